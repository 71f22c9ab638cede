//! 异步错误队列
//!
//! 处理器错误无法同步返回给发布者，统一写入有界队列供旁路观察。
//! 队列满时丢弃最旧的错误，写入方永不阻塞。
//!
use super::bus::EventBusError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::warn;

struct Shared<E> {
    buf: Mutex<VecDeque<E>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl<E> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, VecDeque<E>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 写入端
pub(crate) struct ErrorQueue<E = EventBusError> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for ErrorQueue<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E: std::fmt::Display> ErrorQueue<E> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                buf: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity: capacity.max(1),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn push(&self, err: E) {
        {
            let mut buf = self.shared.lock();
            if buf.len() >= self.shared.capacity {
                if let Some(dropped) = buf.pop_front() {
                    warn!(error = %dropped, "error queue full, dropping oldest error");
                }
            }
            buf.push_back(err);
        }
        self.shared.notify.notify_waiters();
    }

    /// 关闭后 `recv` 在取完剩余错误后返回 `None`
    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    pub(crate) fn receiver(&self) -> ErrorReceiver<E> {
        ErrorReceiver {
            shared: self.shared.clone(),
        }
    }
}

/// 读取端，可克隆；多个读取者之间竞争消费
pub struct ErrorReceiver<E = EventBusError> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for ErrorReceiver<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E> ErrorReceiver<E> {
    /// 等待下一个错误；队列关闭且为空时返回 `None`
    pub async fn recv(&self) -> Option<E> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(err) = self.try_recv() {
                return Some(err);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<E> {
        self.shared.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
