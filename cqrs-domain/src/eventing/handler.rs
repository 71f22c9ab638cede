//! 事件处理器（EventHandler）
//!
//! 处理器以 `handler_type` 标识自身：总线据此去重、分组与标注异步错误。
//!
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

type_name!(
    /// 事件处理器类型名
    EventHandlerType
);

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn handler_type(&self) -> EventHandlerType;
    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()>;
}

type EventHandlerFuture = BoxFuture<'static, DomainResult<()>>;

/// 以闭包实现的事件处理器
pub struct EventHandlerFn<F> {
    handler_type: EventHandlerType,
    f: F,
}

impl<F> EventHandlerFn<F>
where
    F: Fn(Context, Event) -> EventHandlerFuture + Send + Sync,
{
    pub fn new(handler_type: impl Into<EventHandlerType>, f: F) -> Self {
        Self {
            handler_type: handler_type.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventHandler for EventHandlerFn<F>
where
    F: Fn(Context, Event) -> EventHandlerFuture + Send + Sync,
{
    fn handler_type(&self) -> EventHandlerType {
        self.handler_type.clone()
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        (self.f)(ctx.clone(), event.clone()).await
    }
}

/// 事件处理器中间件
pub type EventHandlerMiddleware =
    Arc<dyn Fn(Arc<dyn EventHandler>) -> Arc<dyn EventHandler> + Send + Sync>;

/// 组合中间件，`middleware[0]` 位于最外层
pub fn use_event_handler_middleware(
    handler: Arc<dyn EventHandler>,
    middleware: &[EventHandlerMiddleware],
) -> Arc<dyn EventHandler> {
    middleware
        .iter()
        .rev()
        .fold(handler, |inner, m| m(inner))
}

/// 在隔离边界内执行处理器：panic 被捕获并转换为错误
pub(crate) async fn handle_isolated(
    handler: &dyn EventHandler,
    ctx: &Context,
    event: &Event,
) -> DomainResult<()> {
    match AssertUnwindSafe(handler.handle_event(ctx, event))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(DomainError::EventHandler {
            handler: handler.handler_type().to_string(),
            reason: format!("panic: {}", panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown"
    }
}
