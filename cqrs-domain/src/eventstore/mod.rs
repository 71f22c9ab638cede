//! 事件存储（EventStore）
//!
//! 按聚合划分、只追加、按版本排序的事件流，写入时进行乐观并发校验：
//! 调用方给出的“批次前版本”必须等于流中最新版本，否则整批拒绝。
//! 所有操作按 `Context::namespace()` 隔离。
//!
mod memory;

pub use memory::MemoryEventStore;

use crate::context::Context;
use crate::error::DomainResult;
use crate::event::Event;
use crate::id::Id;
use async_trait::async_trait;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加一批属于同一聚合、版本连续的事件
    ///
    /// `original_version` 为批次前聚合的版本，新聚合为 0。
    async fn save(&self, ctx: &Context, events: &[Event], original_version: usize)
    -> DomainResult<()>;

    /// 加载完整历史；未知标识返回空序列
    async fn load(&self, ctx: &Context, id: &Id) -> DomainResult<Vec<Event>>;

    /// 加载版本不小于 `version` 的事件
    async fn load_from(&self, ctx: &Context, id: &Id, version: usize) -> DomainResult<Vec<Event>> {
        let mut events = self.load(ctx, id).await?;
        events.retain(|e| e.version() >= version);
        Ok(events)
    }
}
