//! 读模型仓储（Repository）
//!
//! 投影处理器维护的读模型以 `Id` 为键存放，核心只依赖查找、遍历、保存与删除；
//! 具体后端在此协议之外实现。
//!
mod memory;

pub use memory::MemoryRepo;

use crate::context::Context;
use crate::error::DomainResult;
use crate::id::Id;
use async_trait::async_trait;

/// 具备唯一标识的读模型
pub trait Entity: Clone + Send + Sync + 'static {
    fn entity_id(&self) -> &Id;

    /// 记录所投影聚合版本的实体返回自身，投影时据此保证事件按序应用
    fn as_versionable(&self) -> Option<&dyn Versionable> {
        None
    }
}

/// 记录已投影到的聚合版本
pub trait Versionable: Send + Sync {
    fn aggregate_version(&self) -> usize;
}

#[async_trait]
pub trait ReadRepo<E: Entity>: Send + Sync {
    /// 不存在时返回 `EntityNotFound`
    async fn find(&self, ctx: &Context, id: &Id) -> DomainResult<E>;

    async fn find_all(&self, ctx: &Context) -> DomainResult<Vec<E>>;
}

#[async_trait]
pub trait WriteRepo<E: Entity>: ReadRepo<E> {
    /// 覆盖同 id 的已有实体；空 id 返回 `MissingEntityId`
    async fn save(&self, ctx: &Context, entity: E) -> DomainResult<()>;

    /// 不存在时返回 `EntityNotFound`
    async fn remove(&self, ctx: &Context, id: &Id) -> DomainResult<()>;
}
