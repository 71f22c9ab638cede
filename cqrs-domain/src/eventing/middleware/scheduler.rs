//! 调度中间件
//!
//! 按 cron 表达式或固定间隔周期性地生成事件，投递给经由中间件注册的处理器：
//! - 每个调度条目运行在独立的定时任务中；
//! - 取消条目的 `Context` 只停止该条目；
//! - 取消调度器的根 `Context` 停止全部条目，之后的调度调用立即返回 `Cancelled`。
//!
use super::cron::CronSchedule;
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::eventing::bus::EventBusError;
use crate::eventing::error_queue::{ErrorQueue, ErrorReceiver};
use crate::eventing::handler::handle_isolated;
use crate::eventing::{EventHandler, EventHandlerMiddleware};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const ERROR_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(CronSchedule),
    Every(Duration),
}

impl Schedule {
    pub fn cron(expr: &str) -> DomainResult<Self> {
        Ok(Self::Cron(CronSchedule::parse(expr)?))
    }

    pub fn every(interval: Duration) -> Self {
        Self::Every(interval)
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(cron) => cron.next_after(after),
            Self::Every(interval) if interval.is_zero() => None,
            Self::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
        }
    }
}

type Handlers = Arc<Mutex<Vec<Arc<dyn EventHandler>>>>;

pub struct Scheduler {
    token: CancellationToken,
    tracker: TaskTracker,
    handlers: Handlers,
    errors: ErrorQueue,
}

/// 返回注册处理器的中间件与调度器；中间件原样返回被包装的处理器
pub fn scheduler_middleware(ctx: &Context) -> (EventHandlerMiddleware, Arc<Scheduler>) {
    let scheduler = Arc::new(Scheduler::new(ctx));
    let handlers = scheduler.handlers.clone();
    let middleware: EventHandlerMiddleware = Arc::new(move |inner: Arc<dyn EventHandler>| {
        handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(inner.clone());
        inner
    });
    (middleware, scheduler)
}

impl Scheduler {
    /// 根 `Context` 取消时停止全部条目
    pub fn new(ctx: &Context) -> Self {
        Self {
            token: ctx.token().child_token(),
            tracker: TaskTracker::new(),
            handlers: Arc::new(Mutex::new(Vec::new())),
            errors: ErrorQueue::new(ERROR_QUEUE_CAPACITY),
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<Arc<dyn EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers().len()
    }

    /// 按 `schedule` 周期生成事件，`f` 收到本次触发时间
    pub fn schedule_event<F>(&self, ctx: &Context, schedule: Schedule, f: F) -> DomainResult<()>
    where
        F: Fn(DateTime<Utc>) -> Event + Send + Sync + 'static,
    {
        if self.token.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        let root = self.token.clone();
        let ctx = ctx.clone();
        let handlers = self.handlers.clone();
        let errors = self.errors.clone();

        self.tracker.spawn(async move {
            let start_wall = Utc::now();
            let start = Instant::now();
            let mut cursor = start_wall;

            loop {
                let Some(next) = schedule.next_after(cursor) else {
                    debug!(?schedule, "schedule has no further fire time");
                    break;
                };
                let offset = (next - start_wall).to_std().unwrap_or_default();

                tokio::select! {
                    biased;
                    _ = root.cancelled() => break,
                    _ = ctx.cancelled() => break,
                    _ = sleep_until(start + offset) => {}
                }
                cursor = next;

                let event = f(next);
                let targets: Vec<Arc<dyn EventHandler>> = handlers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for handler in targets {
                    if let Err(err) = handle_isolated(handler.as_ref(), &ctx, &event).await {
                        let handler_type = handler.handler_type();
                        warn!(
                            handler = %handler_type,
                            event_type = %event.event_type(),
                            error = %err,
                            "scheduled event handler failed"
                        );
                        errors.push(EventBusError::new(handler_type, &ctx, &event, err));
                    }
                }
            }
        });
        Ok(())
    }

    pub fn schedule_cron<F>(&self, ctx: &Context, expr: &str, f: F) -> DomainResult<()>
    where
        F: Fn(DateTime<Utc>) -> Event + Send + Sync + 'static,
    {
        self.schedule_event(ctx, Schedule::cron(expr)?, f)
    }

    pub fn errors(&self) -> ErrorReceiver {
        self.errors.receiver()
    }

    /// 停止全部条目并等待其退出
    pub async fn wait(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.errors.close();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
