//! 聚合（Aggregate）抽象
//!
//! 约束一个聚合的核心行为：
//! - `handle_command` 校验命令并追加候选事件（不直接修改业务状态）；
//! - `apply_event` 是唯一修改业务状态的入口，加载历史与处理新命令走同一路径；
//! - 版本与未提交事件由组合进来的 `AggregateBase` 维护。
//!
mod base;
mod registry;
mod store;

pub use base::AggregateBase;
pub use registry::{AggregateFactory, AggregateRegistry};
pub use store::{AggregateStore, EventSourcedAggregateStore};

use crate::command::{AsAny, Command};
use crate::context::Context;
use crate::error::DomainResult;
use crate::event::Event;
use crate::id::Id;

type_name!(
    /// 聚合类型名
    AggregateType
);

/// 聚合接口
pub trait Aggregate: AsAny {
    fn base(&self) -> &AggregateBase;
    fn base_mut(&mut self) -> &mut AggregateBase;

    /// 处理命令：只允许通过 `base_mut().append_event(..)` 产生事件
    fn handle_command(&mut self, ctx: &Context, cmd: &dyn Command) -> DomainResult<()>;

    /// 应用事件：更新业务状态
    fn apply_event(&mut self, ctx: &Context, event: &Event) -> DomainResult<()>;

    fn entity_id(&self) -> &Id {
        self.base().entity_id()
    }

    fn aggregate_type(&self) -> &AggregateType {
        self.base().aggregate_type()
    }

    fn aggregate_version(&self) -> usize {
        self.base().aggregate_version()
    }

    fn uncommitted_events(&self) -> &[Event] {
        self.base().uncommitted_events()
    }
}

impl dyn Aggregate {
    pub fn downcast_ref<A: Aggregate>(&self) -> Option<&A> {
        self.as_any().downcast_ref::<A>()
    }

    pub fn downcast_mut<A: Aggregate>(&mut self) -> Option<&mut A> {
        self.as_any_mut().downcast_mut::<A>()
    }
}
