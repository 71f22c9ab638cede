//! 内存版事件总线（InMemoryEventBus）
//!
//! 进程内总线，满足 `EventBus` 协议：
//! - 每个处理器类型对应 `Group` 中的一条有界队列，发布时非阻塞地写入所有队列；
//! - 共享同一 `Group` 的多个总线上注册同一处理器类型，形成竞争消费组，
//!   每个事件只被其中一个实例处理；不同处理器类型各得一份（广播）；
//! - 匹配器属于消费组，在发布时求值；同组同类型的实例必须使用相同的匹配器；
//! - 队列满时该处理器类型丢弃此事件，并向错误队列报告；
//! - 每个处理器在独立任务中运行，错误与 panic 均转为异步错误；
//! - 不持久化、不重放：未订阅期间发布的事件不会补投。
//!
use super::bus::{EventBus, EventBusError};
use super::error_queue::{ErrorQueue, ErrorReceiver};
use super::handler::handle_isolated;
use super::{EventHandler, EventHandlerType, EventMatcher};
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use async_trait::async_trait;
use bon::Builder;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// 总线配置
#[derive(Debug, Clone, Builder)]
pub struct EventBusConfig {
    /// 每个处理器类型的待处理队列容量
    #[builder(default = 1024)]
    pub handler_queue_capacity: usize,
    /// 异步错误队列容量，满时丢弃最旧的错误
    #[builder(default = 100)]
    pub error_queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone)]
struct Delivery {
    ctx: Context,
    event: Event,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Delivery>>>;

struct GroupQueue {
    matcher: EventMatcher,
    tx: mpsc::Sender<Delivery>,
    rx: SharedReceiver,
    subscribers: usize,
}

/// 消费组：处理器类型到待处理队列的映射，可被多个总线共享
#[derive(Clone, Default)]
pub struct Group {
    queues: Arc<Mutex<HashMap<EventHandlerType, GroupQueue>>>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventHandlerType, GroupQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(
        &self,
        handler_type: &EventHandlerType,
        matcher: EventMatcher,
        capacity: usize,
    ) -> DomainResult<SharedReceiver> {
        let mut queues = self.lock();
        if let Some(queue) = queues.get(handler_type) {
            if queue.matcher != matcher {
                return Err(DomainError::event_bus(format!(
                    "handler {handler_type} is already in the group with matcher {:?}",
                    queue.matcher
                )));
            }
        }
        let queue = queues.entry(handler_type.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            GroupQueue {
                matcher,
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
                subscribers: 0,
            }
        });
        queue.subscribers += 1;
        Ok(queue.rx.clone())
    }

    fn unsubscribe(&self, handler_type: &EventHandlerType) {
        let mut queues = self.lock();
        if let Some(queue) = queues.get_mut(handler_type) {
            queue.subscribers = queue.subscribers.saturating_sub(1);
            if queue.subscribers == 0 {
                queues.remove(handler_type);
            }
        }
    }

    /// 非阻塞写入所有队列，返回因队列满而未送达的处理器类型
    fn publish(&self, delivery: &Delivery) -> Vec<EventHandlerType> {
        let queues = self.lock();
        let mut full = Vec::new();
        for (handler_type, queue) in queues.iter() {
            if !queue.matcher.matches(&delivery.event) {
                continue;
            }
            match queue.tx.try_send(delivery.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => full.push(handler_type.clone()),
                Err(TrySendError::Closed(_)) => {
                    debug!(handler = %handler_type, "handler queue closed");
                }
            }
        }
        full
    }
}

pub struct InMemoryEventBus {
    group: Group,
    config: EventBusConfig,
    token: CancellationToken,
    tracker: TaskTracker,
    registered: Mutex<HashSet<EventHandlerType>>,
    errors: ErrorQueue,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_group(Group::new(), EventBusConfig::default())
    }

    /// 与其他总线共享消费组
    pub fn with_group(group: Group, config: EventBusConfig) -> Self {
        Self {
            group,
            errors: ErrorQueue::new(config.error_queue_capacity),
            config,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self::with_group(Group::new(), config)
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    fn registered(&self) -> MutexGuard<'_, HashSet<EventHandlerType>> {
        self.registered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(&self, ctx: &Context, handler: Arc<dyn EventHandler>, rx: SharedReceiver) {
        let bus_token = self.token.clone();
        let handler_token = ctx.token().clone();
        let group = self.group.clone();
        let errors = self.errors.clone();
        let handler_type = handler.handler_type();

        self.tracker.spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = bus_token.cancelled() => None,
                    _ = handler_token.cancelled() => None,
                    delivery = async { rx.lock().await.recv().await } => delivery,
                };
                let Some(Delivery { ctx, event }) = next else {
                    break;
                };

                if let Err(err) = handle_isolated(handler.as_ref(), &ctx, &event).await {
                    warn!(
                        handler = %handler_type,
                        event_type = %event.event_type(),
                        aggregate_id = %event.aggregate_id(),
                        version = event.version(),
                        error = %err,
                        "event handler failed"
                    );
                    errors.push(EventBusError::new(handler_type.clone(), &ctx, &event, err));
                }
            }
            group.unsubscribe(&handler_type);
            debug!(handler = %handler_type, "event bus worker stopped");
        });
    }
}

impl Drop for InMemoryEventBus {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl EventHandler for InMemoryEventBus {
    fn handler_type(&self) -> EventHandlerType {
        EventHandlerType::from_static("eventbus")
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        if self.token.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        // 处理器收到发布者的命名空间与附加值，取消则跟随总线
        let delivery = Delivery {
            ctx: ctx.with_token(self.token.child_token()),
            event: event.clone(),
        };
        for handler_type in self.group.publish(&delivery) {
            warn!(
                handler = %handler_type,
                event_type = %event.event_type(),
                "publish queue full, event dropped for handler"
            );
            self.errors.push(EventBusError::new(
                handler_type,
                ctx,
                event,
                DomainError::event_bus("publish queue full"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn add_handler(
        &self,
        ctx: &Context,
        matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
    ) -> DomainResult<()> {
        if matcher.is_unsatisfiable() {
            return Err(DomainError::MissingMatcher);
        }
        let handler_type = handler.handler_type();
        if handler_type.is_empty() {
            return Err(DomainError::MissingHandler);
        }
        if self.token.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let rx = {
            let mut registered = self.registered();
            if registered.contains(&handler_type) {
                return Err(DomainError::HandlerAlreadyAdded {
                    handler: handler_type.to_string(),
                });
            }
            let rx = self.group.subscribe(
                &handler_type,
                matcher,
                self.config.handler_queue_capacity,
            )?;
            registered.insert(handler_type.clone());
            rx
        };
        self.spawn_worker(ctx, handler, rx);
        debug!(handler = %handler_type, "event handler added");
        Ok(())
    }

    fn errors(&self) -> ErrorReceiver {
        self.errors.receiver()
    }

    async fn wait(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.errors.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockEventHandler;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_drops_only_for_that_handler() {
        let bus = InMemoryEventBus::with_config(
            EventBusConfig::builder().handler_queue_capacity(1).build(),
        );
        let ctx = Context::new();

        let slow = Arc::new(MockEventHandler::new("slow"));
        slow.set_delay(Duration::from_millis(200));
        let fast = Arc::new(MockEventHandler::new("fast"));
        bus.add_handler(&ctx, EventMatcher::All, slow.clone())
            .await
            .unwrap();
        bus.add_handler(&ctx, EventMatcher::All, fast.clone())
            .await
            .unwrap();

        for _ in 0..3 {
            bus.handle_event(&ctx, &Event::new("Burst", Utc::now()))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(fast.wait_for(3, Duration::from_secs(1)).await);
        let err = bus.errors().recv().await.unwrap();
        assert_eq!(err.handler_type, "slow");
        assert!(matches!(err.source, DomainError::EventBus { .. }));
        bus.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_members_must_share_a_matcher() {
        let group = Group::new();
        let a = InMemoryEventBus::with_group(group.clone(), EventBusConfig::default());
        let b = InMemoryEventBus::with_group(group, EventBusConfig::default());
        let ctx = Context::new();

        let first = Arc::new(MockEventHandler::new("projector"));
        a.add_handler(&ctx, EventMatcher::events(["Wanted"]), first.clone())
            .await
            .unwrap();
        let err = b
            .add_handler(
                &ctx,
                EventMatcher::events(["Other"]),
                Arc::new(MockEventHandler::new("projector")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::EventBus { .. }));

        // 被拒绝后可用相同匹配器加入
        let second = Arc::new(MockEventHandler::new("projector"));
        b.add_handler(&ctx, EventMatcher::events(["Wanted"]), second.clone())
            .await
            .unwrap();

        for _ in 0..10 {
            a.handle_event(&ctx, &Event::new("Wanted", Utc::now()))
                .await
                .unwrap();
            a.handle_event(&ctx, &Event::new("Ignored", Utc::now()))
                .await
                .unwrap();
        }
        let mut total = 0;
        for _ in 0..100 {
            total = first.events().len() + second.events().len();
            if total == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(total, 10);
        assert!(
            first
                .events()
                .iter()
                .chain(second.events().iter())
                .all(|e| e.event_type() == "Wanted")
        );
        a.wait().await;
        b.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_after_wait_is_rejected() {
        let bus = InMemoryEventBus::new();
        bus.wait().await;
        assert!(matches!(
            bus.handle_event(&Context::new(), &Event::new("Late", Utc::now()))
                .await,
            Err(DomainError::Cancelled)
        ));
        assert!(bus.errors().recv().await.is_none());
    }
}
