//! 待办清单示例：命令总线 → 聚合 → 事件存储 → 事件总线 → 投影读模型
//!
//! 运行：`RUST_LOG=debug cargo run -p cqrs-application --example todo_app`
//!
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::Utc;
use cqrs_application::middleware::{command_with_validation, lock_middleware, validator_middleware};
use cqrs_application::{AggregateCommandHandler, CommandBus, Projector, ProjectorEventHandler};
use cqrs_domain::aggregate::{
    Aggregate, AggregateBase, AggregateRegistry, AggregateType, EventSourcedAggregateStore,
};
use cqrs_domain::command::{Command, CommandHandler, CommandType, use_command_handler_middleware};
use cqrs_domain::event::Event;
use cqrs_domain::eventing::middleware::{
    SequencerConfig, observer_middleware, sequencer_middleware, unique_group,
};
use cqrs_domain::eventing::{
    EventBus, EventHandler, EventHandlerType, EventMatcher, InMemoryEventBus,
    use_event_handler_middleware,
};
use cqrs_domain::eventstore::MemoryEventStore;
use cqrs_domain::repo::{Entity, MemoryRepo, ReadRepo, Versionable};
use cqrs_domain::{Context, DomainError, DomainResult, Id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TODO_LIST: &str = "TodoList";
const CREATED: &str = "todo:created";
const ITEM_ADDED: &str = "todo:item_added";
const ITEM_CHECKED: &str = "todo:item_checked";

macro_rules! todo_command {
    ($name:ident, $type:literal) => {
        impl Command for $name {
            fn aggregate_id(&self) -> Id {
                self.id.clone()
            }
            fn aggregate_type(&self) -> AggregateType {
                AggregateType::from_static(TODO_LIST)
            }
            fn command_type(&self) -> CommandType {
                CommandType::from_static($type)
            }
        }
    };
}

#[derive(Debug, Serialize, Deserialize)]
struct Create {
    id: Id,
}
todo_command!(Create, "todo:create");

#[derive(Debug, Serialize, Deserialize)]
struct AddItem {
    id: Id,
    description: String,
}
todo_command!(AddItem, "todo:add_item");

#[derive(Debug, Serialize, Deserialize)]
struct CheckItem {
    id: Id,
    item_id: usize,
}
todo_command!(CheckItem, "todo:check_item");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemAdded {
    item_id: usize,
    description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemChecked {
    item_id: usize,
}

#[derive(Debug, Clone)]
struct Item {
    id: usize,
    description: String,
    done: bool,
}

struct TodoList {
    base: AggregateBase,
    created: bool,
    items: Vec<Item>,
}

impl Aggregate for TodoList {
    fn base(&self) -> &AggregateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase {
        &mut self.base
    }

    fn handle_command(&mut self, _ctx: &Context, cmd: &dyn Command) -> DomainResult<()> {
        if cmd.is::<Create>() {
            if self.created {
                return Err(DomainError::InvalidCommand {
                    reason: "already created".into(),
                });
            }
            self.base.append_empty_event(CREATED, Utc::now());
            return Ok(());
        }
        if !self.created {
            return Err(DomainError::InvalidCommand {
                reason: "list not created".into(),
            });
        }
        if let Some(add) = cmd.downcast_ref::<AddItem>() {
            let item_id = self.items.len() + 1;
            self.base.append_event(
                ITEM_ADDED,
                ItemAdded {
                    item_id,
                    description: add.description.clone(),
                },
                Utc::now(),
            );
            Ok(())
        } else if let Some(check) = cmd.downcast_ref::<CheckItem>() {
            if !self.items.iter().any(|i| i.id == check.item_id) {
                return Err(DomainError::InvalidCommand {
                    reason: format!("no item {}", check.item_id),
                });
            }
            self.base.append_event(
                ITEM_CHECKED,
                ItemChecked {
                    item_id: check.item_id,
                },
                Utc::now(),
            );
            Ok(())
        } else {
            Err(DomainError::UnknownCommand {
                command_type: cmd.command_type().to_string(),
            })
        }
    }

    fn apply_event(&mut self, _ctx: &Context, event: &Event) -> DomainResult<()> {
        match event.event_type().as_str() {
            CREATED => self.created = true,
            ITEM_ADDED => {
                if let Some(data) = event.data_as::<ItemAdded>() {
                    self.items.push(Item {
                        id: data.item_id,
                        description: data.description.clone(),
                        done: false,
                    });
                }
            }
            ITEM_CHECKED => {
                if let Some(data) = event.data_as::<ItemChecked>() {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == data.item_id) {
                        item.done = true;
                    }
                }
            }
            other => {
                return Err(DomainError::UnknownEvent {
                    event_type: other.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TodoView {
    id: Id,
    version: usize,
    items: Vec<Item>,
}

impl Entity for TodoView {
    fn entity_id(&self) -> &Id {
        &self.id
    }

    fn as_versionable(&self) -> Option<&dyn Versionable> {
        Some(self)
    }
}

impl Versionable for TodoView {
    fn aggregate_version(&self) -> usize {
        self.version
    }
}

struct TodoProjector;

#[async_trait]
impl Projector<TodoView> for TodoProjector {
    fn projector_type(&self) -> EventHandlerType {
        EventHandlerType::from_static("todo_projector")
    }

    async fn project(
        &self,
        _ctx: &Context,
        event: &Event,
        mut view: TodoView,
    ) -> DomainResult<Option<TodoView>> {
        if let Some(data) = event.data_as::<ItemAdded>() {
            view.items.push(Item {
                id: data.item_id,
                description: data.description.clone(),
                done: false,
            });
        } else if let Some(data) = event.data_as::<ItemChecked>() {
            if let Some(item) = view.items.iter_mut().find(|i| i.id == data.item_id) {
                item.done = true;
            }
        }
        view.version = event.version();
        Ok(Some(view))
    }
}

/// 打印每个事件；以观察者方式安装
struct Logger;

#[async_trait]
impl EventHandler for Logger {
    fn handler_type(&self) -> EventHandlerType {
        EventHandlerType::from_static("logger")
    }

    async fn handle_event(&self, _ctx: &Context, event: &Event) -> DomainResult<()> {
        info!(event = %event, aggregate_id = %event.aggregate_id(), "observed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let ctx = Context::new();

    // 事件总线与存储
    let bus = Arc::new(InMemoryEventBus::new());
    let events = Arc::new(MemoryEventStore::with_event_handler(bus.clone()));

    let registry = AggregateRegistry::new();
    registry.register(|id| {
        Box::new(TodoList {
            base: AggregateBase::new(TODO_LIST, id),
            created: false,
            items: Vec::new(),
        })
    })?;
    let store = Arc::new(EventSourcedAggregateStore::new(events, Arc::new(registry)));

    // 命令侧
    let handler = use_command_handler_middleware(
        Arc::new(AggregateCommandHandler::new(TODO_LIST, store).with_conflict_retries(3)),
        &[validator_middleware(), lock_middleware()],
    );
    let commands = CommandBus::new();
    for command_type in ["todo:create", "todo:add_item", "todo:check_item"] {
        commands.set_handler(handler.clone(), command_type)?;
    }

    // 读侧：定序后投影
    let views: Arc<MemoryRepo<TodoView>> = Arc::new(MemoryRepo::new());
    let projector = Arc::new(ProjectorEventHandler::new(
        Arc::new(TodoProjector),
        views.clone(),
        |id: &Id| TodoView {
            id: id.clone(),
            version: 0,
            items: Vec::new(),
        },
    ));
    let (sequencer, sequencer_errors) = sequencer_middleware(
        &ctx,
        SequencerConfig::builder()
            .gap_timeout(Duration::from_secs(5))
            .build(),
    );
    bus.add_handler(
        &ctx,
        EventMatcher::aggregates([TODO_LIST]),
        use_event_handler_middleware(projector, &[sequencer]),
    )
    .await?;

    // 观察者：每个实例一份
    bus.add_handler(
        &ctx,
        EventMatcher::All,
        use_event_handler_middleware(Arc::new(Logger), &[observer_middleware(unique_group())]),
    )
    .await?;

    // 处理命令
    let id = Id::new();
    commands
        .handle_command(&ctx, Box::new(Create { id: id.clone() }))
        .await?;
    for description in ["buy milk", "walk the dog"] {
        commands
            .handle_command(
                &ctx,
                Box::new(AddItem {
                    id: id.clone(),
                    description: description.to_string(),
                }),
            )
            .await?;
    }
    let check = command_with_validation(
        Box::new(CheckItem {
            id: id.clone(),
            item_id: 1,
        }),
        |cmd| match cmd.downcast_ref::<CheckItem>() {
            Some(c) if c.item_id > 0 => Ok(()),
            _ => Err(DomainError::Validation {
                reason: "item id must be positive".into(),
            }),
        },
    );
    commands.handle_command(&ctx, check).await?;

    // 等待读模型追上
    for _ in 0..100 {
        if views.find(&ctx, &id).await.is_ok_and(|v| v.version == 4) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let view = views.find(&ctx, &id).await?;
    for item in &view.items {
        info!(item = item.id, done = item.done, "{}", item.description);
    }

    let bus_errors = bus.errors();
    bus.wait().await;
    while let Some(err) = bus_errors.try_recv() {
        tracing::warn!(error = %err, "event bus error");
    }
    while let Some(err) = sequencer_errors.try_recv() {
        tracing::warn!(error = %err, "sequencer error");
    }
    Ok(())
}
