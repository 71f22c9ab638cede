#![allow(dead_code)]

use async_trait::async_trait;
use cqrs_domain::event::Event;
use cqrs_domain::eventing::{EventHandler, EventHandlerType};
use cqrs_domain::{Context, DomainError, DomainResult};
use std::sync::Mutex;
use std::time::Duration;

/// 记录收到的事件；可配置为失败、变慢或 panic
pub struct Recorder {
    handler_type: EventHandlerType,
    events: Mutex<Vec<(Context, Event)>>,
    failure: Option<&'static str>,
    delay: Option<Duration>,
    panics: bool,
}

impl Recorder {
    pub fn new(handler_type: &'static str) -> Self {
        Self {
            handler_type: EventHandlerType::from_static(handler_type),
            events: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
            panics: false,
        }
    }

    pub fn failing(mut self, reason: &'static str) -> Self {
        self.failure = Some(reason);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<Context> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn handler_type(&self) -> EventHandlerType {
        self.handler_type.clone()
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("handler panicked");
        }
        if let Some(reason) = self.failure {
            return Err(DomainError::InvalidState {
                reason: reason.to_string(),
            });
        }
        self.events
            .lock()
            .unwrap()
            .push((ctx.clone(), event.clone()));
        Ok(())
    }
}

/// 轮询直到条件成立或超时
pub async fn eventually(timeout: Duration, f: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    f()
}
