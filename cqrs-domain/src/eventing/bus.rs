//! 事件总线（EventBus）协议
//!
//! - `add_handler`：按匹配器订阅处理器；
//! - `handle_event`：发布事件，投递在独立任务中进行，处理器错误不回传给发布者；
//! - `errors`：异步错误观察端；
//! - `wait`：取消总线并等待所有处理中的任务结束。
//!
//! 总线本身也是一个 `EventHandler`，可直接挂在事件存储或发件箱之后。
//! 同一聚合事件的顺序不由总线保证，需要时显式加装定序中间件。
//!
use super::error_queue::ErrorReceiver;
use super::{EventHandler, EventHandlerType, EventMatcher};
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[async_trait]
pub trait EventBus: EventHandler {
    async fn add_handler(
        &self,
        ctx: &Context,
        matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
    ) -> DomainResult<()>;

    fn errors(&self) -> ErrorReceiver;

    async fn wait(&self);
}

/// 异步处理错误：附带处理器类型与事件
#[derive(Debug, Error)]
#[error("could not handle event ({handler_type}): {source}: ({event})")]
pub struct EventBusError {
    pub handler_type: EventHandlerType,
    pub event: Event,
    pub ctx: Context,
    pub source: DomainError,
}

impl EventBusError {
    pub fn new(
        handler_type: EventHandlerType,
        ctx: &Context,
        event: &Event,
        source: DomainError,
    ) -> Self {
        Self {
            handler_type,
            event: event.clone(),
            ctx: ctx.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn display_names_handler_and_event() {
        let event = Event::new("Event", Utc::now()).for_aggregate("A", crate::Id::new(), 1);
        let err = EventBusError::new(
            EventHandlerType::from_static("error_handler"),
            &Context::new(),
            &event,
            DomainError::InvalidState {
                reason: "handler error".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "could not handle event (error_handler): invalid state: handler error: (Event@1)"
        );
    }
}
