//! 聚合命令处理器
//!
//! 一条命令的完整处理循环：加载聚合 → 处理命令 → 保存新事件。
//! 保存遇到乐观并发冲突时可按配置重新加载并重试。
//!
use async_trait::async_trait;
use cqrs_domain::aggregate::{AggregateStore, AggregateType};
use cqrs_domain::command::{Command, CommandHandler};
use cqrs_domain::{Context, DomainError, DomainResult, Id};
use std::sync::Arc;
use tracing::debug;

pub struct AggregateCommandHandler {
    aggregate_type: AggregateType,
    store: Arc<dyn AggregateStore>,
    conflict_retries: usize,
}

impl AggregateCommandHandler {
    pub fn new(aggregate_type: impl Into<AggregateType>, store: Arc<dyn AggregateStore>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            store,
            conflict_retries: 0,
        }
    }

    /// 版本冲突时最多重试 `retries` 次
    pub fn with_conflict_retries(mut self, retries: usize) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    async fn try_handle(&self, ctx: &Context, cmd: &dyn Command, id: &Id) -> DomainResult<()> {
        let mut agg = self.store.load(ctx, &self.aggregate_type, id).await?;

        let buffered = agg.uncommitted_events().len();
        if let Err(err) = agg.handle_command(ctx, cmd) {
            agg.base_mut().truncate_uncommitted_events(buffered);
            return Err(err);
        }

        self.store.save(ctx, agg.as_mut()).await
    }
}

#[async_trait]
impl CommandHandler for AggregateCommandHandler {
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            aggregate_type = %self.aggregate_type,
            command_type = %cmd.command_type(),
            aggregate_id = %cmd.aggregate_id(),
        )
    )]
    async fn handle_command(&self, ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()> {
        let found = cmd.aggregate_type();
        if found != self.aggregate_type {
            return Err(DomainError::MismatchedAggregateType {
                expected: self.aggregate_type.to_string(),
                found: found.to_string(),
            });
        }
        let id = cmd.aggregate_id();
        if id.is_empty() {
            return Err(DomainError::MissingAggregateId);
        }

        let mut attempt = 0;
        loop {
            match self.try_handle(ctx, &*cmd, &id).await {
                Err(err) if err.is_version_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    debug!(attempt, error = %err, "version conflict, reloading aggregate");
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrs_domain::aggregate::{Aggregate, AggregateRegistry, EventSourcedAggregateStore};
    use cqrs_domain::event::Event;
    use cqrs_domain::eventstore::{EventStore, MemoryEventStore};
    use cqrs_domain::mocks::{MockAggregate, MockCommand};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Arc<AggregateRegistry> {
        let registry = AggregateRegistry::new();
        registry
            .register(|id| Box::new(MockAggregate::new(id)))
            .unwrap();
        Arc::new(registry)
    }

    fn handler(events: Arc<dyn EventStore>) -> AggregateCommandHandler {
        let store = Arc::new(EventSourcedAggregateStore::new(events, registry()));
        AggregateCommandHandler::new(MockAggregate::aggregate_type_name(), store)
    }

    #[tokio::test]
    async fn load_handle_save() {
        let events = Arc::new(MemoryEventStore::new());
        let h = handler(events.clone());
        let ctx = Context::new();
        let id = Id::new();

        h.handle_command(&ctx, Box::new(MockCommand::new(id.clone(), "a")))
            .await
            .unwrap();
        h.handle_command(&ctx, Box::new(MockCommand::new(id.clone(), "b")))
            .await
            .unwrap();

        let stored = events.load(&ctx, &id).await.unwrap();
        assert_eq!(stored.iter().map(Event::version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn rejects_foreign_and_anonymous_commands() {
        let h = handler(Arc::new(MemoryEventStore::new()));
        let ctx = Context::new();

        let err = h
            .handle_command(&ctx, Box::new(MockCommand::new(Id::empty(), "a")))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::MissingAggregateId));

        let other = AggregateCommandHandler::new(
            "Other",
            Arc::new(EventSourcedAggregateStore::new(
                Arc::new(MemoryEventStore::new()),
                registry(),
            )),
        );
        let err = other
            .handle_command(&ctx, Box::new(MockCommand::new(Id::new(), "a")))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::MismatchedAggregateType { .. }));
    }

    #[tokio::test]
    async fn command_errors_store_nothing() {
        let events = Arc::new(MemoryEventStore::new());
        let h = handler(events.clone());
        let ctx = Context::new();
        let id = Id::new();

        // 空内容被聚合拒绝
        let err = h
            .handle_command(&ctx, Box::new(MockCommand::new(id.clone(), "")))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidCommand { .. }));
        assert!(events.load(&ctx, &id).await.unwrap().is_empty());
    }

    /// 前 `conflicts` 次保存返回版本冲突
    struct Conflicting {
        inner: MemoryEventStore,
        conflicts: AtomicUsize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl EventStore for Conflicting {
        async fn save(&self, ctx: &Context, events: &[Event], version: usize) -> DomainResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(DomainError::VersionConflict {
                    aggregate_id: events[0].aggregate_id().to_string(),
                    expected: version,
                    actual: version + 1,
                });
            }
            self.inner.save(ctx, events, version).await
        }

        async fn load(&self, ctx: &Context, id: &Id) -> DomainResult<Vec<Event>> {
            self.inner.load(ctx, id).await
        }
    }

    fn conflicting(conflicts: usize) -> Arc<Conflicting> {
        Arc::new(Conflicting {
            inner: MemoryEventStore::new(),
            conflicts: AtomicUsize::new(conflicts),
            saves: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn retries_on_version_conflict() {
        let events = conflicting(2);
        let h = handler(events.clone()).with_conflict_retries(2);
        let id = Id::new();

        h.handle_command(&Context::new(), Box::new(MockCommand::new(id.clone(), "x")))
            .await
            .unwrap();
        assert_eq!(events.saves.load(Ordering::SeqCst), 3);
        assert_eq!(events.load(&Context::new(), &id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflict_surfaces_without_retries() {
        let events = conflicting(1);
        let h = handler(events.clone());

        let err = h
            .handle_command(&Context::new(), Box::new(MockCommand::new(Id::new(), "x")))
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(events.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rollback_drops_only_new_events() {
        let ctx = Context::new();
        let id = Id::new();
        let mut agg = MockAggregate::new(id.clone());
        agg.handle_command(&ctx, &MockCommand::new(id.clone(), "kept"))
            .unwrap();
        let buffered = agg.uncommitted_events().len();
        agg.handle_command(&ctx, &MockCommand::new(id, "dropped"))
            .unwrap();
        agg.base_mut().truncate_uncommitted_events(buffered);
        assert_eq!(agg.uncommitted_events().len(), 1);
    }
}
