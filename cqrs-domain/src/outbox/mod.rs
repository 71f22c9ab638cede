//! 发件箱（Outbox）
//!
//! 事件存储保存成功后先将事件暂存入发件箱，再由后台任务投递给下游处理器（通常是事件总线），
//! 投递失败的事件保留到下一轮重试，保证至少一次投递。
//!
mod memory;

pub use memory::{MemoryOutbox, OutboxConfig};

use crate::eventing::{ErrorReceiver, EventHandler};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub trait Outbox: EventHandler {
    /// 启动投递任务，事件投递给 `handler`
    fn start(&self, handler: Arc<dyn EventHandler>) -> OutboxHandle;

    fn errors(&self) -> ErrorReceiver;
}

/// 投递任务句柄，丢弃时停止任务
pub struct OutboxHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl OutboxHandle {
    pub(crate) fn new(token: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { token, tasks }
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for OutboxHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
