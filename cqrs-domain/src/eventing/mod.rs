//! 事件分发
//!
//! 处理器协议、匹配器、内存总线与处理器中间件。
//!
pub mod bus;
pub mod bus_inmemory;
pub(crate) mod error_queue;
pub mod handler;
pub mod matcher;
pub mod middleware;
pub mod multi;

pub use bus::{EventBus, EventBusError};
pub use bus_inmemory::{EventBusConfig, Group, InMemoryEventBus};
pub use error_queue::ErrorReceiver;
pub use handler::{
    EventHandler, EventHandlerFn, EventHandlerMiddleware, EventHandlerType,
    use_event_handler_middleware,
};
pub use matcher::{EventMatcher, MatchFn};
pub use multi::MultiEventHandler;
