//! 组合处理器：按顺序执行多个处理器，遇到第一个错误即停止并返回
//!
use super::{EventHandler, EventHandlerType};
use crate::context::Context;
use crate::error::DomainResult;
use crate::event::Event;
use async_trait::async_trait;
use std::sync::Arc;

pub struct MultiEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MultiEventHandler {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl EventHandler for MultiEventHandler {
    /// `multi_<h1>_<h2>...`
    fn handler_type(&self) -> EventHandlerType {
        let names: Vec<String> = self
            .handlers
            .iter()
            .map(|h| h.handler_type().to_string())
            .collect();
        EventHandlerType::new(format!("multi_{}", names.join("_")))
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        for handler in &self.handlers {
            handler.handle_event(ctx, event).await?;
        }
        Ok(())
    }
}
