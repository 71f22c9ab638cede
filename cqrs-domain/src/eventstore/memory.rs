//! 内存版事件存储（MemoryEventStore）
//!
//! 每个命名空间一把互斥锁，在锁内完成“比较版本并追加”。
//! 可选的事件处理器在锁释放后依次接收成功写入的事件，常用于对接总线或发件箱。
//! 写入一旦提交，处理器的失败不再影响 `save` 的结果，而是写入 `errors()` 错误队列。
//!
use super::EventStore;
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::eventing::bus::EventBusError;
use crate::eventing::error_queue::{ErrorQueue, ErrorReceiver};
use crate::eventing::EventHandler;
use crate::id::Id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

type Streams = HashMap<Id, Vec<Event>>;

const ERROR_QUEUE_CAPACITY: usize = 100;

pub struct MemoryEventStore {
    namespaces: Mutex<HashMap<String, Arc<Mutex<Streams>>>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    errors: ErrorQueue,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
            event_handler: None,
            errors: ErrorQueue::new(ERROR_QUEUE_CAPACITY),
        }
    }

    /// 写入成功后将事件交给 `handler`
    pub fn with_event_handler(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            event_handler: Some(handler),
            ..Self::new()
        }
    }

    /// 提交后发布失败的事件
    pub fn errors(&self) -> ErrorReceiver {
        self.errors.receiver()
    }

    fn namespace(&self, ctx: &Context) -> Arc<Mutex<Streams>> {
        let mut namespaces = lock(&self.namespaces);
        namespaces
            .entry(ctx.namespace().to_string())
            .or_default()
            .clone()
    }

    fn validate(
        events: &[Event],
        original_version: usize,
        stream: Option<&[Event]>,
    ) -> DomainResult<()> {
        let Some(first) = events.first() else {
            return Err(DomainError::NoEvents);
        };
        let id = first.aggregate_id();
        if id.is_empty() {
            return Err(DomainError::MissingAggregateId);
        }
        if events.iter().any(|e| e.aggregate_id() != id) {
            return Err(DomainError::MismatchedAggregateId);
        }

        let actual = stream.and_then(|s| s.last()).map_or(0, Event::version);
        if actual != original_version {
            return Err(DomainError::VersionConflict {
                aggregate_id: id.to_string(),
                expected: original_version,
                actual,
            });
        }

        for (offset, event) in events.iter().enumerate() {
            let expected = original_version + offset + 1;
            if event.version() != expected {
                return Err(DomainError::IncorrectEventVersion {
                    aggregate_id: id.to_string(),
                    expected,
                    found: event.version(),
                });
            }
        }
        Ok(())
    }

    /// 跳过校验直接追加（仅用于构造损坏历史的测试）
    #[cfg(test)]
    pub(crate) fn force_append(&self, ctx: &Context, event: Event) {
        let ns = self.namespace(ctx);
        lock(&ns)
            .entry(event.aggregate_id().clone())
            .or_default()
            .push(event);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(namespace = %ctx.namespace(), count = events.len(), original_version = original_version)
    )]
    async fn save(
        &self,
        ctx: &Context,
        events: &[Event],
        original_version: usize,
    ) -> DomainResult<()> {
        let ns = self.namespace(ctx);
        {
            let mut streams = lock(&ns);
            let id = events.first().map(|e| e.aggregate_id().clone());
            let stream = id.as_ref().and_then(|id| streams.get(id)).map(Vec::as_slice);
            Self::validate(events, original_version, stream)?;

            if let Some(id) = id {
                streams.entry(id).or_default().extend_from_slice(events);
            }
        }
        debug!("events saved");

        if let Some(handler) = &self.event_handler {
            for event in events {
                if let Err(err) = handler.handle_event(ctx, event).await {
                    let handler_type = handler.handler_type();
                    warn!(
                        handler = %handler_type,
                        event_type = %event.event_type(),
                        aggregate_id = %event.aggregate_id(),
                        version = event.version(),
                        error = %err,
                        "stored event could not be published"
                    );
                    self.errors
                        .push(EventBusError::new(handler_type, ctx, event, err));
                }
            }
        }
        Ok(())
    }

    async fn load(&self, ctx: &Context, id: &Id) -> DomainResult<Vec<Event>> {
        let ns = self.namespace(ctx);
        let streams = lock(&ns);
        Ok(streams.get(id).cloned().unwrap_or_default())
    }

    async fn load_from(&self, ctx: &Context, id: &Id, version: usize) -> DomainResult<Vec<Event>> {
        let ns = self.namespace(ctx);
        let streams = lock(&ns);
        Ok(streams
            .get(id)
            .map(|s| {
                s.iter()
                    .filter(|e| e.version() >= version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockEventHandler;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &Id, version: usize) -> Event {
        Event::new("Tested", Utc::now())
            .for_aggregate("Test", id.clone(), version)
            .with_data(json!({"v": version}))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_validation_order() {
        let store = MemoryEventStore::new();
        let ctx = Context::new();
        let id = Id::new();

        assert!(matches!(
            store.save(&ctx, &[], 0).await,
            Err(DomainError::NoEvents)
        ));
        assert!(matches!(
            store.save(&ctx, &[event(&id, 1), event(&Id::new(), 2)], 0).await,
            Err(DomainError::MismatchedAggregateId)
        ));
        assert!(matches!(
            store.save(&ctx, &[event(&id, 2)], 1).await,
            Err(DomainError::VersionConflict { expected: 1, actual: 0, .. })
        ));
        assert!(matches!(
            store.save(&ctx, &[event(&id, 1), event(&id, 3)], 0).await,
            Err(DomainError::IncorrectEventVersion { expected: 2, found: 3, .. })
        ));
        assert!(store.load(&ctx, &id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_from_filters_by_version() {
        let store = MemoryEventStore::new();
        let ctx = Context::new();
        let id = Id::new();
        let batch = vec![event(&id, 1), event(&id, 2), event(&id, 3)];
        store.save(&ctx, &batch, 0).await.unwrap();

        let tail = store.load_from(&ctx, &id, 2).await.unwrap();
        assert_eq!(tail, batch[1..].to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn event_handler_sees_stored_events() {
        let handler = Arc::new(MockEventHandler::new("store-observer"));
        let store = MemoryEventStore::with_event_handler(handler.clone());
        let ctx = Context::new();
        let id = Id::new();

        store
            .save(&ctx, &[event(&id, 1), event(&id, 2)], 0)
            .await
            .unwrap();
        assert_eq!(handler.events().len(), 2);

        // 校验失败的批次不会到达处理器
        let _ = store.save(&ctx, &[event(&id, 1)], 0).await;
        assert_eq!(handler.events().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handler_error_is_reported_after_commit() {
        let handler = Arc::new(MockEventHandler::new("failing"));
        handler.fail_with("boom");
        let store = MemoryEventStore::with_event_handler(handler);
        let ctx = Context::new();
        let id = Id::new();

        // 已提交的写入仍然成功，失败进入错误队列
        store
            .save(&ctx, &[event(&id, 1), event(&id, 2)], 0)
            .await
            .unwrap();
        assert_eq!(store.load(&ctx, &id).await.unwrap().len(), 2);

        let errors = store.errors();
        assert_eq!(errors.len(), 2);
        let err = errors.try_recv().unwrap();
        assert_eq!(err.handler_type, "failing");
        assert_eq!(err.event.version(), 1);
        assert!(matches!(err.source, DomainError::InvalidState { .. }));

        // 后续写入基于已提交的版本
        store.save(&ctx, &[event(&id, 3)], 2).await.unwrap();
    }
}
