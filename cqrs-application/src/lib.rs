//! CQRS 应用层（cqrs-application）
//!
//! 在领域层协议之上编排命令与事件的处理流程：
//! - `command_bus`：按命令类型路由到处理器；
//! - `aggregate_command_handler`：加载聚合、处理命令、保存事件，可选冲突重试；
//! - `middleware`：命令处理器中间件（校验、按聚合加锁）；
//! - `projector` / `saga`：读模型投影与流程编排的事件处理器。
//!
pub mod aggregate_command_handler;
pub mod command_bus;
pub mod middleware;
pub mod projector;
pub mod saga;

pub use aggregate_command_handler::AggregateCommandHandler;
pub use command_bus::CommandBus;
pub use projector::{Projector, ProjectorEventHandler};
pub use saga::{Saga, SagaEventHandler};
