//! 测试替身：记录型事件/命令处理器、简单聚合与命令
//!
//! 启用 `mocks` feature 后可在下游 crate 的测试中使用。
//!
use crate::aggregate::{Aggregate, AggregateBase, AggregateType};
use crate::command::{Command, CommandHandler, CommandType};
use crate::context::Context;
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::eventing::{EventHandler, EventHandlerType};
use crate::id::Id;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

pub const MOCK_AGGREGATE_TYPE: &str = "MockAggregate";
pub const MOCK_COMMAND_TYPE: &str = "MockCommand";
pub const MOCK_EVENT_TYPE: &str = "MockEvent";

#[derive(Default)]
struct HandlerState {
    events: Vec<Event>,
    contexts: Vec<Context>,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// 记录收到的事件；可设置失败原因与处理延迟
pub struct MockEventHandler {
    handler_type: EventHandlerType,
    state: Mutex<HandlerState>,
    notify: Notify,
}

impl MockEventHandler {
    pub fn new(handler_type: impl Into<EventHandlerType>) -> Self {
        Self {
            handler_type: handler_type.into(),
            state: Mutex::new(HandlerState::default()),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn contexts(&self) -> Vec<Context> {
        self.state().contexts.clone()
    }

    /// 之后的事件均以 `InvalidState { reason }` 失败，且不被记录
    pub fn fail_with(&self, reason: impl Into<String>) {
        self.state().failure = Some(reason.into());
    }

    pub fn clear_failure(&self) {
        self.state().failure = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// 等待至少 `n` 个事件被记录，超时返回 `false`
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.state().events.len() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl EventHandler for MockEventHandler {
    fn handler_type(&self) -> EventHandlerType {
        self.handler_type.clone()
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state();
            if let Some(reason) = &state.failure {
                return Err(DomainError::InvalidState {
                    reason: reason.clone(),
                });
            }
            state.events.push(event.clone());
            state.contexts.push(ctx.clone());
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockCommand {
    pub id: Id,
    pub content: String,
}

impl MockCommand {
    pub fn new(id: Id, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
        }
    }
}

impl Command for MockCommand {
    fn aggregate_id(&self) -> Id {
        self.id.clone()
    }

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::from_static(MOCK_AGGREGATE_TYPE)
    }

    fn command_type(&self) -> CommandType {
        CommandType::from_static(MOCK_COMMAND_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockEventData {
    pub content: String,
}

/// 每条 `MockCommand` 产生一条 `MockEvent`，应用时记录内容
#[derive(Debug)]
pub struct MockAggregate {
    base: AggregateBase,
    contents: Vec<String>,
}

impl MockAggregate {
    pub fn new(id: Id) -> Self {
        Self {
            base: AggregateBase::new(MOCK_AGGREGATE_TYPE, id),
            contents: Vec::new(),
        }
    }

    pub fn aggregate_type_name() -> AggregateType {
        AggregateType::from_static(MOCK_AGGREGATE_TYPE)
    }

    pub fn contents(&self) -> &[String] {
        &self.contents
    }
}

impl Aggregate for MockAggregate {
    fn base(&self) -> &AggregateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase {
        &mut self.base
    }

    fn handle_command(&mut self, _ctx: &Context, cmd: &dyn Command) -> DomainResult<()> {
        let Some(cmd) = cmd.downcast_ref::<MockCommand>() else {
            return Err(DomainError::UnknownCommand {
                command_type: cmd.command_type().to_string(),
            });
        };
        if cmd.content.is_empty() {
            return Err(DomainError::InvalidCommand {
                reason: "content is empty".into(),
            });
        }
        self.base.append_event(
            MOCK_EVENT_TYPE,
            MockEventData {
                content: cmd.content.clone(),
            },
            Utc::now(),
        );
        Ok(())
    }

    fn apply_event(&mut self, _ctx: &Context, event: &Event) -> DomainResult<()> {
        if event.event_type() != MOCK_EVENT_TYPE {
            return Err(DomainError::UnknownEvent {
                event_type: event.event_type().to_string(),
            });
        }
        let data = event
            .data_as::<MockEventData>()
            .ok_or_else(|| DomainError::InvalidState {
                reason: "mock event without data".into(),
            })?;
        self.contents.push(data.content.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CommandState {
    commands: Vec<Box<dyn Command>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// 记录收到的命令
#[derive(Default)]
pub struct MockCommandHandler {
    state: Mutex<CommandState>,
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CommandState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.state().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn command_types(&self) -> Vec<CommandType> {
        self.state()
            .commands
            .iter()
            .map(|c| c.command_type())
            .collect()
    }

    pub fn take(&self) -> Vec<Box<dyn Command>> {
        std::mem::take(&mut self.state().commands)
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        self.state().failure = Some(reason.into());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, _ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(reason) = &state.failure {
            return Err(DomainError::InvalidState {
                reason: reason.clone(),
            });
        }
        state.commands.push(cmd);
        Ok(())
    }
}
