//! 观察者中间件
//!
//! 在处理器类型后追加分组后缀 `<type>_<group>`：
//! - 每个实例使用唯一分组（`unique_group()`）时，共享消费组的各总线都会收到事件（广播）；
//! - 使用同名分组时，同名实例之间竞争消费。
//!
use crate::context::Context;
use crate::error::DomainResult;
use crate::event::Event;
use crate::eventing::{EventHandler, EventHandlerMiddleware, EventHandlerType};
use async_trait::async_trait;
use std::sync::Arc;

/// 生成实例唯一的分组名
pub fn unique_group() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn observer_middleware(group: impl Into<String>) -> EventHandlerMiddleware {
    let group: String = group.into();
    Arc::new(move |inner: Arc<dyn EventHandler>| {
        Arc::new(ObserverHandler {
            inner,
            group: group.clone(),
        }) as Arc<dyn EventHandler>
    })
}

pub struct ObserverHandler {
    inner: Arc<dyn EventHandler>,
    group: String,
}

impl ObserverHandler {
    pub fn inner_handler(&self) -> &Arc<dyn EventHandler> {
        &self.inner
    }
}

#[async_trait]
impl EventHandler for ObserverHandler {
    fn handler_type(&self) -> EventHandlerType {
        EventHandlerType::new(format!("{}_{}", self.inner.handler_type(), self.group))
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        self.inner.handle_event(ctx, event).await
    }
}
