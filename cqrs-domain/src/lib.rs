//! 事件溯源 / CQRS 领域层运行时（cqrs-domain）
//!
//! 聚合接收命令、产生事件，事件经事件存储持久化后通过事件总线分发给处理器：
//! - 标识（`id`）与上下文（`context`，命名空间、取消与附加值）
//! - 命令（`command`）、事件（`event`）与类型注册表（`registry`）
//! - 聚合与基于事件溯源的聚合存储（`aggregate`）
//! - 乐观并发的事件存储（`eventstore`）
//! - 事件总线、匹配器与处理器中间件（`eventing`）
//! - 投影读模型仓储（`repo`）与发件箱（`outbox`）
//!
//! 本 crate 只定义核心协议与内存实现，具体存储与传输在协议之外适配。
//!
//! 典型用法：
//! 1. 定义聚合（组合 `AggregateBase`）、命令与事件数据，注册到对应注册表；
//! 2. 以 `EventSourcedAggregateStore` 连接事件存储，加载、处理命令并保存；
//! 3. 事件存储把新事件交给 `InMemoryEventBus`，总线按匹配器投递给处理器；
//! 4. 需要保序或定时事件时，为处理器加装 `sequencer` / `scheduler` 中间件。
//!
#[macro_use]
mod macros;

pub mod aggregate;
pub mod command;
pub mod context;
pub mod error;
pub mod event;
pub mod eventing;
pub mod eventstore;
pub mod id;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod outbox;
pub mod registry;
pub mod repo;

pub use context::{Context, DEFAULT_NAMESPACE};
pub use error::{DomainError, DomainResult};
pub use id::{Id, IdProvider, set_id_provider};
