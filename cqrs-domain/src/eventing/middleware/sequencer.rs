//! 定序中间件（Sequencer）
//!
//! 为每个 `(命名空间, 聚合标识)` 维护一条逻辑队列，按版本升序把事件交给内层处理器：
//! - 乱序到达的事件暂存，直到缺失版本补齐才放行；缺口只阻塞该聚合，不阻塞其他聚合；
//! - 放行的事件按聚合交给独立的投递任务，不同聚合并发处理，慢聚合不阻塞分发；
//! - 聚合没有暂存或投递中的事件时即被移除，只保留下一个期望版本；
//! - 版本从 1 开始计数，早于期望版本的事件视为重复并丢弃；
//! - 可选 `gap_timeout`：缺口持续超时后跳到最小的暂存版本，并报告缺口；
//! - 版本为 0 的事件（不属于聚合）直接放行；
//! - 入口队列有界，满时 `handle_event` 等待（对发布方施加背压）。
//!
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::eventing::bus::EventBusError;
use crate::eventing::error_queue::{ErrorQueue, ErrorReceiver};
use crate::eventing::handler::handle_isolated;
use crate::eventing::{EventHandler, EventHandlerMiddleware, EventHandlerType};
use crate::id::Id;
use async_trait::async_trait;
use bon::Builder;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Debug, Clone, Builder)]
pub struct SequencerConfig {
    /// 缺口等待上限，`None` 表示一直等待
    pub gap_timeout: Option<Duration>,
    /// 入口队列容量
    #[builder(default = 1024)]
    pub queue_capacity: usize,
    #[builder(default = 100)]
    pub error_queue_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Delivery {
    ctx: Context,
    event: Event,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Key {
    namespace: String,
    id: Id,
}

struct Stream {
    pending: BTreeMap<usize, Delivery>,
    gap_since: Option<Instant>,
    /// 已放行、尚未交给投递任务的事件
    ready: VecDeque<Delivery>,
    busy: bool,
}

impl Stream {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            gap_since: None,
            ready: VecDeque::new(),
            busy: false,
        }
    }

    fn is_idle(&self) -> bool {
        !self.busy && self.pending.is_empty() && self.ready.is_empty()
    }
}

pub struct Sequencer {
    handler_type: EventHandlerType,
    tx: mpsc::Sender<Delivery>,
    token: CancellationToken,
    tracker: TaskTracker,
    errors: ErrorQueue,
    active: Arc<AtomicUsize>,
}

impl Sequencer {
    /// `ctx` 的取消令牌控制定序器的生命周期
    pub fn new(ctx: &Context, inner: Arc<dyn EventHandler>, config: SequencerConfig) -> Self {
        let errors = ErrorQueue::new(config.error_queue_capacity);
        Self::with_error_queue(ctx, inner, config, errors)
    }

    fn with_error_queue(
        ctx: &Context,
        inner: Arc<dyn EventHandler>,
        config: SequencerConfig,
        errors: ErrorQueue,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let token = ctx.token().child_token();
        let tracker = TaskTracker::new();
        let handler_type = EventHandlerType::new(format!("{}-sequencer", inner.handler_type()));

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher {
            deliverer: Deliverer {
                inner,
                token: token.clone(),
                tracker: tracker.clone(),
                errors: errors.clone(),
                done: done_tx,
            },
            config,
            cursors: HashMap::new(),
            streams: HashMap::new(),
            active: active.clone(),
        };
        tracker.spawn(dispatcher.run(rx, done_rx));

        Self {
            handler_type,
            tx,
            token,
            tracker,
            errors,
            active,
        }
    }

    pub fn errors(&self) -> ErrorReceiver {
        self.errors.receiver()
    }

    /// 仍有暂存或投递中事件的聚合数
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// 停止接收新事件，等待已放行的事件处理完毕；仍在暂存中的事件被丢弃
    pub async fn wait(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl EventHandler for Sequencer {
    fn handler_type(&self) -> EventHandlerType {
        self.handler_type.clone()
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        if self.token.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let delivery = Delivery {
            ctx: ctx.clone(),
            event: event.clone(),
        };
        tokio::select! {
            _ = self.token.cancelled() => Err(DomainError::Cancelled),
            sent = self.tx.send(delivery) => sent.map_err(|_| DomainError::Cancelled),
        }
    }
}

/// 以中间件形式安装定序器；同一中间件创建的所有定序器共享一个错误队列
pub fn sequencer_middleware(
    ctx: &Context,
    config: SequencerConfig,
) -> (EventHandlerMiddleware, ErrorReceiver) {
    let errors = ErrorQueue::new(config.error_queue_capacity);
    let receiver = errors.receiver();
    let ctx = ctx.clone();
    let middleware: EventHandlerMiddleware = Arc::new(move |inner: Arc<dyn EventHandler>| {
        Arc::new(Sequencer::with_error_queue(
            &ctx,
            inner,
            config.clone(),
            errors.clone(),
        )) as Arc<dyn EventHandler>
    });
    (middleware, receiver)
}

/// 把放行的批次交给独立任务按序投递，完成后回报聚合键
struct Deliverer {
    inner: Arc<dyn EventHandler>,
    token: CancellationToken,
    tracker: TaskTracker,
    errors: ErrorQueue,
    done: mpsc::UnboundedSender<Key>,
}

impl Deliverer {
    fn spawn_one(&self, delivery: Delivery) {
        let inner = self.inner.clone();
        let errors = self.errors.clone();
        self.tracker.spawn(async move {
            deliver(inner.as_ref(), &errors, delivery).await;
        });
    }

    fn spawn_batch(&self, key: Key, batch: VecDeque<Delivery>) {
        let inner = self.inner.clone();
        let errors = self.errors.clone();
        let token = self.token.clone();
        let done = self.done.clone();
        self.tracker.spawn(async move {
            for delivery in batch {
                if token.is_cancelled() {
                    break;
                }
                deliver(inner.as_ref(), &errors, delivery).await;
            }
            let _ = done.send(key);
        });
    }
}

struct Dispatcher {
    deliverer: Deliverer,
    config: SequencerConfig,
    /// 每个聚合下一个期望版本；空闲的聚合只保留这一项
    cursors: HashMap<Key, usize>,
    /// 有暂存或投递中事件的聚合
    streams: HashMap<Key, Stream>,
    active: Arc<AtomicUsize>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Delivery>,
        mut done: mpsc::UnboundedReceiver<Key>,
    ) {
        let token = self.deliverer.token.clone();
        loop {
            let deadline = self.next_deadline();
            let timeout = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(key) = done.recv() => self.finish(key),
                received = rx.recv() => match received {
                    Some(delivery) => self.accept(delivery),
                    None => break,
                },
                _ = timeout => self.skip_expired_gaps(),
            }
            self.active.store(self.streams.len(), Ordering::Release);
        }
        debug!(handler = %self.deliverer.inner.handler_type(), "sequencer stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let gap_timeout = self.config.gap_timeout?;
        self.streams
            .values()
            .filter_map(|s| s.gap_since)
            .min()
            .map(|since| since + gap_timeout)
    }

    fn accept(&mut self, delivery: Delivery) {
        let version = delivery.event.version();
        if version == 0 {
            self.deliverer.spawn_one(delivery);
            return;
        }

        let key = Key {
            namespace: delivery.ctx.namespace().to_string(),
            id: delivery.event.aggregate_id().clone(),
        };
        let next = self.cursors.get(&key).copied().unwrap_or(1);
        let buffered = self
            .streams
            .get(&key)
            .is_some_and(|s| s.pending.contains_key(&version));
        if version < next || buffered {
            debug!(
                aggregate_id = %key.id,
                namespace = %key.namespace,
                version,
                expected = next,
                "duplicate event dropped by sequencer"
            );
            return;
        }

        self.streams
            .entry(key.clone())
            .or_insert_with(Stream::new)
            .pending
            .insert(version, delivery);
        self.release(&key);
    }

    /// 放行从期望版本开始连续的暂存事件，空闲的聚合随即移除
    fn release(&mut self, key: &Key) {
        let next = self.cursors.entry(key.clone()).or_insert(1);
        let Some(stream) = self.streams.get_mut(key) else {
            return;
        };

        let mut advanced = false;
        while let Some(delivery) = stream.pending.remove(&*next) {
            *next += 1;
            stream.ready.push_back(delivery);
            advanced = true;
        }
        stream.gap_since = match (stream.pending.is_empty(), stream.gap_since) {
            (true, _) => None,
            (false, Some(since)) if !advanced => Some(since),
            (false, _) => Some(Instant::now()),
        };

        if !stream.busy && !stream.ready.is_empty() {
            stream.busy = true;
            let batch = std::mem::take(&mut stream.ready);
            self.deliverer.spawn_batch(key.clone(), batch);
        }
        if stream.is_idle() {
            self.streams.remove(key);
        }
    }

    fn finish(&mut self, key: Key) {
        if let Some(stream) = self.streams.get_mut(&key) {
            stream.busy = false;
        }
        self.release(&key);
    }

    fn skip_expired_gaps(&mut self) {
        let Some(gap_timeout) = self.config.gap_timeout else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<Key> = self
            .streams
            .iter()
            .filter(|(_, s)| s.gap_since.is_some_and(|since| since + gap_timeout <= now))
            .map(|(key, _)| key.clone())
            .collect();
        let handler_type = self.deliverer.inner.handler_type();

        for key in expired {
            let Some(stream) = self.streams.get(&key) else {
                continue;
            };
            let Some((&lowest, first)) = stream.pending.iter().next() else {
                continue;
            };
            let expected = self.cursors.get(&key).copied().unwrap_or(1);

            warn!(
                aggregate_id = %key.id,
                namespace = %key.namespace,
                expected,
                found = lowest,
                "sequencer gap timed out, skipping ahead"
            );
            self.deliverer.errors.push(EventBusError::new(
                handler_type.clone(),
                &first.ctx,
                &first.event,
                DomainError::IncorrectEventVersion {
                    aggregate_id: key.id.to_string(),
                    expected,
                    found: lowest,
                },
            ));
            self.cursors.insert(key.clone(), lowest);
            self.release(&key);
        }
    }
}

async fn deliver(inner: &dyn EventHandler, errors: &ErrorQueue, delivery: Delivery) {
    let Delivery { ctx, event } = delivery;
    if let Err(err) = handle_isolated(inner, &ctx, &event).await {
        warn!(
            handler = %inner.handler_type(),
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id(),
            version = event.version(),
            error = %err,
            "sequenced event handler failed"
        );
        errors.push(EventBusError::new(inner.handler_type(), &ctx, &event, err));
    }
}
