use super::{Aggregate, AggregateRegistry, AggregateType};
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::eventstore::EventStore;
use crate::id::Id;
use async_trait::async_trait;
use std::sync::Arc;

/// 聚合存储：负责聚合的加载与保存
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// 加载聚合；没有历史事件的聚合是合法的新聚合
    async fn load(
        &self,
        ctx: &Context,
        aggregate_type: &AggregateType,
        id: &Id,
    ) -> DomainResult<Box<dyn Aggregate>>;

    /// 保存聚合的未提交事件
    async fn save(&self, ctx: &Context, aggregate: &mut dyn Aggregate) -> DomainResult<()>;
}

/// 基于事件溯源的聚合存储
///
/// - 加载：创建零状态聚合后按版本顺序回放全部历史事件；
/// - 保存：以保存前的版本作为乐观锁令牌整批提交，成功后回放新事件并推进版本；
///   失败时保留未提交事件，调用方可重新加载后重试。
pub struct EventSourcedAggregateStore {
    store: Arc<dyn EventStore>,
    registry: Arc<AggregateRegistry>,
}

impl EventSourcedAggregateStore {
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<AggregateRegistry>) -> Self {
        Self { store, registry }
    }

    /// 使用进程级聚合注册表
    pub fn with_global_registry(store: Arc<dyn EventStore>) -> Self {
        Self::new(store, AggregateRegistry::global())
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    fn apply_events(
        ctx: &Context,
        aggregate: &mut dyn Aggregate,
        events: &[Event],
    ) -> DomainResult<()> {
        for event in events {
            if event.aggregate_type() != aggregate.aggregate_type() {
                return Err(DomainError::MismatchedEventType {
                    expected: aggregate.aggregate_type().to_string(),
                    found: event.aggregate_type().to_string(),
                });
            }
            let expected = aggregate.aggregate_version() + 1;
            if event.version() != expected {
                return Err(DomainError::IncorrectEventVersion {
                    aggregate_id: aggregate.entity_id().to_string(),
                    expected,
                    found: event.version(),
                });
            }
            aggregate.apply_event(ctx, event)?;
            aggregate.base_mut().set_aggregate_version(event.version());
        }
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for EventSourcedAggregateStore {
    async fn load(
        &self,
        ctx: &Context,
        aggregate_type: &AggregateType,
        id: &Id,
    ) -> DomainResult<Box<dyn Aggregate>> {
        let mut aggregate = self
            .registry
            .create(aggregate_type, id.clone())
            .map_err(|err| match err {
                DomainError::NotRegistered { .. } => DomainError::AggregateNotFound {
                    aggregate_type: aggregate_type.to_string(),
                    aggregate_id: id.to_string(),
                },
                other => other,
            })?;

        let events = self.store.load(ctx, id).await?;
        Self::apply_events(ctx, aggregate.as_mut(), &events)?;
        Ok(aggregate)
    }

    async fn save(&self, ctx: &Context, aggregate: &mut dyn Aggregate) -> DomainResult<()> {
        let events = aggregate.uncommitted_events().to_vec();
        if events.is_empty() {
            return Ok(());
        }

        self.store
            .save(ctx, &events, aggregate.aggregate_version())
            .await?;

        aggregate.base_mut().clear_uncommitted_events();
        Self::apply_events(ctx, aggregate, &events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::MemoryEventStore;
    use crate::mocks::{MockAggregate, MockCommand};
    use proptest::prelude::*;

    fn setup() -> (Arc<MemoryEventStore>, EventSourcedAggregateStore) {
        let registry = AggregateRegistry::new();
        registry
            .register(|id| Box::new(MockAggregate::new(id)))
            .unwrap();
        let events = Arc::new(MemoryEventStore::new());
        let store = EventSourcedAggregateStore::new(events.clone(), Arc::new(registry));
        (events, store)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_of_unknown_id_is_a_fresh_aggregate() {
        let (_, store) = setup();
        let ctx = Context::new();
        let agg = store
            .load(&ctx, &MockAggregate::aggregate_type_name(), &Id::new())
            .await
            .unwrap();
        assert_eq!(agg.aggregate_version(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_of_unregistered_type_is_not_found() {
        let (_, store) = setup();
        let err = store
            .load(&Context::new(), &AggregateType::from_static("Ghost"), &Id::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DomainError::AggregateNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_then_load_replays_state() {
        let (events, store) = setup();
        let ctx = Context::new();
        let id = Id::new();

        let mut agg = store
            .load(&ctx, &MockAggregate::aggregate_type_name(), &id)
            .await
            .unwrap();
        agg.handle_command(&ctx, &MockCommand::new(id.clone(), "first"))
            .unwrap();
        agg.handle_command(&ctx, &MockCommand::new(id.clone(), "second"))
            .unwrap();
        store.save(&ctx, agg.as_mut()).await.unwrap();

        assert_eq!(agg.aggregate_version(), 2);
        assert!(agg.uncommitted_events().is_empty());
        assert_eq!(events.load(&ctx, &id).await.unwrap().len(), 2);

        let loaded = store
            .load(&ctx, &MockAggregate::aggregate_type_name(), &id)
            .await
            .unwrap();
        let mock = loaded.downcast_ref::<MockAggregate>().unwrap();
        assert_eq!(mock.contents(), &["first".to_string(), "second".to_string()]);
        assert_eq!(loaded.aggregate_version(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_save_keeps_buffer_for_retry() {
        let (_, store) = setup();
        let ctx = Context::new();
        let id = Id::new();
        let ty = MockAggregate::aggregate_type_name();

        let mut a = store.load(&ctx, &ty, &id).await.unwrap();
        let mut b = store.load(&ctx, &ty, &id).await.unwrap();
        a.handle_command(&ctx, &MockCommand::new(id.clone(), "a"))
            .unwrap();
        b.handle_command(&ctx, &MockCommand::new(id.clone(), "b"))
            .unwrap();

        store.save(&ctx, a.as_mut()).await.unwrap();
        let err = store.save(&ctx, b.as_mut()).await.unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(b.uncommitted_events().len(), 1);
        assert_eq!(b.aggregate_version(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_failure_after_commit_still_advances_the_aggregate() {
        use crate::eventing::{EventBus, InMemoryEventBus};

        let bus = Arc::new(InMemoryEventBus::new());
        bus.wait().await;

        let registry = AggregateRegistry::new();
        registry
            .register(|id| Box::new(MockAggregate::new(id)))
            .unwrap();
        let events = Arc::new(MemoryEventStore::with_event_handler(bus));
        let store = EventSourcedAggregateStore::new(events.clone(), Arc::new(registry));
        let ctx = Context::new();
        let id = Id::new();
        let ty = MockAggregate::aggregate_type_name();

        let mut agg = store.load(&ctx, &ty, &id).await.unwrap();
        agg.handle_command(&ctx, &MockCommand::new(id.clone(), "first"))
            .unwrap();
        store.save(&ctx, agg.as_mut()).await.unwrap();
        assert!(agg.uncommitted_events().is_empty());
        assert_eq!(agg.aggregate_version(), 1);

        let err = events.errors().try_recv().unwrap();
        assert_eq!(err.handler_type, "eventbus");
        assert!(matches!(err.source, DomainError::Cancelled));

        // 下一条命令基于已提交的版本，不会与自身写入冲突
        agg.handle_command(&ctx, &MockCommand::new(id.clone(), "second"))
            .unwrap();
        store.save(&ctx, agg.as_mut()).await.unwrap();
        assert_eq!(events.load(&ctx, &id).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn version_gap_in_history_fails_the_load() {
        let (events, store) = setup();
        let ctx = Context::new();
        let id = Id::new();
        let ty = MockAggregate::aggregate_type_name();

        let mut agg = store.load(&ctx, &ty, &id).await.unwrap();
        agg.handle_command(&ctx, &MockCommand::new(id.clone(), "x"))
            .unwrap();
        store.save(&ctx, agg.as_mut()).await.unwrap();

        // 直接写入一条跳号事件，模拟损坏的历史
        let broken = Event::new("MockEvent", chrono::Utc::now()).for_aggregate(
            ty.clone(),
            id.clone(),
            3,
        );
        events.force_append(&ctx, broken);

        let err = store.load(&ctx, &ty, &id).await.err().unwrap();
        assert!(matches!(
            err,
            DomainError::IncorrectEventVersion { expected: 2, found: 3, .. }
        ));
    }

    fn replay(contents: &[String]) -> MockAggregate {
        let ctx = Context::new();
        let id = Id::from_raw("replay");
        let mut source = MockAggregate::new(id.clone());
        for c in contents {
            source
                .handle_command(&ctx, &MockCommand::new(id.clone(), c.clone()))
                .unwrap();
        }
        let history = source.uncommitted_events().to_vec();

        let mut agg = MockAggregate::new(id);
        EventSourcedAggregateStore::apply_events(&ctx, &mut agg, &history).unwrap();
        agg
    }

    proptest! {
        #[test]
        fn replay_is_deterministic(contents in proptest::collection::vec("[a-z]{1,8}", 0..20)) {
            let first = replay(&contents);
            let second = replay(&contents);
            prop_assert_eq!(first.aggregate_version(), contents.len());
            prop_assert_eq!(first.contents(), second.contents());
            prop_assert_eq!(first.aggregate_version(), second.aggregate_version());
        }
    }
}
