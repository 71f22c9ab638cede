//! 内存发件箱
//!
//! 周期轮询暂存区：成功的条目移除，失败的条目累计重试次数，
//! 超过 `max_attempts` 后丢弃并报告错误。
//!
use super::{Outbox, OutboxHandle};
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::eventing::bus::EventBusError;
use crate::eventing::error_queue::{ErrorQueue, ErrorReceiver};
use crate::eventing::handler::handle_isolated;
use crate::eventing::{EventHandler, EventHandlerType};
use async_trait::async_trait;
use bon::Builder;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Debug, Clone, Builder)]
pub struct OutboxConfig {
    /// 轮询间隔
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,
    /// 单条事件的最大投递次数，0 表示无限重试
    #[builder(default = 10)]
    pub max_attempts: u32,
    #[builder(default = 100)]
    pub error_queue_capacity: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone)]
struct Entry {
    ctx: Context,
    event: Event,
    attempts: u32,
}

#[derive(Default)]
struct Staging {
    next_seq: u64,
    entries: BTreeMap<u64, Entry>,
}

type SharedStaging = Arc<Mutex<Staging>>;

fn lock(staging: &SharedStaging) -> MutexGuard<'_, Staging> {
    staging.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryOutbox {
    config: OutboxConfig,
    staging: SharedStaging,
    errors: ErrorQueue,
}

impl Default for MemoryOutbox {
    fn default() -> Self {
        Self::new(OutboxConfig::default())
    }
}

impl MemoryOutbox {
    pub fn new(config: OutboxConfig) -> Self {
        Self {
            errors: ErrorQueue::new(config.error_queue_capacity),
            config,
            staging: Arc::new(Mutex::new(Staging::default())),
        }
    }

    /// 尚未投递成功的条目数
    pub fn pending(&self) -> usize {
        lock(&self.staging).entries.len()
    }

    fn spawn_periodic<F, Fut>(token: CancellationToken, interval: Duration, mut f: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn deliver_pending(
        staging: &SharedStaging,
        handler: &dyn EventHandler,
        max_attempts: u32,
        errors: &ErrorQueue,
    ) {
        let batch: Vec<(u64, Entry)> = lock(staging)
            .entries
            .iter()
            .map(|(seq, entry)| (*seq, entry.clone()))
            .collect();

        for (seq, entry) in batch {
            let result = handle_isolated(handler, &entry.ctx, &entry.event).await;
            let mut guard = lock(staging);
            match result {
                Ok(()) => {
                    guard.entries.remove(&seq);
                }
                Err(err) => {
                    let Some(stored) = guard.entries.get_mut(&seq) else {
                        continue;
                    };
                    stored.attempts += 1;
                    let attempts = stored.attempts;
                    if max_attempts > 0 && attempts >= max_attempts {
                        guard.entries.remove(&seq);
                        error!(
                            handler = %handler.handler_type(),
                            event_type = %entry.event.event_type(),
                            aggregate_id = %entry.event.aggregate_id(),
                            version = entry.event.version(),
                            attempts,
                            error = %err,
                            "outbox gave up on event"
                        );
                        errors.push(EventBusError::new(
                            handler.handler_type(),
                            &entry.ctx,
                            &entry.event,
                            err,
                        ));
                    } else {
                        warn!(
                            handler = %handler.handler_type(),
                            event_type = %entry.event.event_type(),
                            attempts,
                            error = %err,
                            "outbox delivery failed, will retry"
                        );
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for MemoryOutbox {
    fn handler_type(&self) -> EventHandlerType {
        EventHandlerType::from_static("outbox")
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let mut staging = lock(&self.staging);
        let seq = staging.next_seq;
        staging.next_seq += 1;
        staging.entries.insert(
            seq,
            Entry {
                ctx: ctx.clone(),
                event: event.clone(),
                attempts: 0,
            },
        );
        Ok(())
    }
}

impl Outbox for MemoryOutbox {
    fn start(&self, handler: Arc<dyn EventHandler>) -> OutboxHandle {
        let token = CancellationToken::new();
        let staging = self.staging.clone();
        let errors = self.errors.clone();
        let max_attempts = self.config.max_attempts;

        let task = Self::spawn_periodic(token.clone(), self.config.poll_interval, move || {
            let staging = staging.clone();
            let handler = handler.clone();
            let errors = errors.clone();
            async move {
                Self::deliver_pending(&staging, handler.as_ref(), max_attempts, &errors).await;
            }
        });
        OutboxHandle::new(token, vec![task])
    }

    fn errors(&self) -> ErrorReceiver {
        self.errors.receiver()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockEventHandler;
    use chrono::Utc;

    fn outbox(max_attempts: u32) -> MemoryOutbox {
        MemoryOutbox::new(
            OutboxConfig::builder()
                .poll_interval(Duration::from_millis(10))
                .max_attempts(max_attempts)
                .build(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_staged_events_and_clears_them() {
        let outbox = outbox(3);
        let ctx = Context::new();
        for _ in 0..3 {
            outbox
                .handle_event(&ctx, &Event::new("Staged", Utc::now()))
                .await
                .unwrap();
        }
        assert_eq!(outbox.pending(), 3);

        let target = Arc::new(MockEventHandler::new("target"));
        let handle = outbox.start(target.clone());
        assert!(target.wait_for(3, Duration::from_secs(1)).await);
        handle.shutdown();
        handle.join().await;
        assert_eq!(outbox.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gives_up_after_max_attempts() {
        let outbox = outbox(2);
        outbox
            .handle_event(&Context::new(), &Event::new("Doomed", Utc::now()))
            .await
            .unwrap();

        let target = Arc::new(MockEventHandler::new("target"));
        target.fail_with("downstream unavailable");
        let handle = outbox.start(target.clone());

        let err = outbox.errors().recv().await.unwrap();
        assert_eq!(err.handler_type, "target");
        assert!(err.to_string().contains("downstream unavailable"));
        assert_eq!(outbox.pending(), 0);
        drop(handle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retries_until_the_handler_recovers() {
        let outbox = outbox(0);
        outbox
            .handle_event(&Context::new(), &Event::new("Retry", Utc::now()))
            .await
            .unwrap();

        let target = Arc::new(MockEventHandler::new("target"));
        target.fail_with("not yet");
        let handle = outbox.start(target.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(outbox.pending(), 1);

        target.clear_failure();
        assert!(target.wait_for(1, Duration::from_secs(1)).await);
        handle.shutdown();
        handle.join().await;
        assert_eq!(outbox.pending(), 0);
    }
}
