//! 聚合锁中间件
//!
//! 同一聚合同时只允许一条命令在处理中，后到的命令立即以 `AggregateLocked` 失败，
//! 不排队等待。锁在内层处理结束（包括出错与被取消）时释放。
//!
use async_trait::async_trait;
use cqrs_domain::command::{Command, CommandHandler, CommandHandlerMiddleware};
use cqrs_domain::{Context, DomainError, DomainResult, Id};
use dashmap::DashSet;
use std::sync::Arc;

pub fn lock_middleware() -> CommandHandlerMiddleware {
    let locks: Arc<DashSet<Id>> = Arc::new(DashSet::new());
    Arc::new(move |inner: Arc<dyn CommandHandler>| {
        Arc::new(Locking {
            inner,
            locks: locks.clone(),
        }) as Arc<dyn CommandHandler>
    })
}

struct Locking {
    inner: Arc<dyn CommandHandler>,
    locks: Arc<DashSet<Id>>,
}

struct Held<'a> {
    locks: &'a DashSet<Id>,
    id: Id,
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.locks.remove(&self.id);
    }
}

#[async_trait]
impl CommandHandler for Locking {
    async fn handle_command(&self, ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()> {
        let id = cmd.aggregate_id();
        if !self.locks.insert(id.clone()) {
            return Err(DomainError::AggregateLocked {
                aggregate_id: id.to_string(),
            });
        }
        let _held = Held {
            locks: &self.locks,
            id,
        };
        self.inner.handle_command(ctx, cmd).await
    }
}
