//! 流程编排（Saga）
//!
//! Saga 监听事件并向命令处理器发出新命令，闭合“命令 → 事件 → 命令”的回路。
//!
use async_trait::async_trait;
use cqrs_domain::command::CommandHandler;
use cqrs_domain::event::Event;
use cqrs_domain::eventing::{EventHandler, EventHandlerType};
use cqrs_domain::{Context, DomainResult};
use std::sync::Arc;

#[async_trait]
pub trait Saga: Send + Sync {
    fn saga_type(&self) -> EventHandlerType;

    async fn run_saga(
        &self,
        ctx: &Context,
        event: &Event,
        commands: &dyn CommandHandler,
    ) -> DomainResult<()>;
}

/// 把 Saga 适配为事件处理器，处理器类型即 Saga 类型
pub struct SagaEventHandler {
    saga: Arc<dyn Saga>,
    commands: Arc<dyn CommandHandler>,
}

impl SagaEventHandler {
    pub fn new(saga: Arc<dyn Saga>, commands: Arc<dyn CommandHandler>) -> Self {
        Self { saga, commands }
    }
}

#[async_trait]
impl EventHandler for SagaEventHandler {
    fn handler_type(&self) -> EventHandlerType {
        self.saga.saga_type()
    }

    async fn handle_event(&self, ctx: &Context, event: &Event) -> DomainResult<()> {
        self.saga.run_saga(ctx, event, self.commands.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cqrs_domain::Id;
    use cqrs_domain::command::CommandType;
    use cqrs_domain::mocks::{MOCK_COMMAND_TYPE, MockCommand, MockCommandHandler};

    /// 每个 `Ordered` 事件触发一条命令
    struct Echo;

    #[async_trait]
    impl Saga for Echo {
        fn saga_type(&self) -> EventHandlerType {
            EventHandlerType::from_static("echo_saga")
        }

        async fn run_saga(
            &self,
            ctx: &Context,
            event: &Event,
            commands: &dyn CommandHandler,
        ) -> DomainResult<()> {
            if event.event_type() != "Ordered" {
                return Ok(());
            }
            commands
                .handle_command(
                    ctx,
                    Box::new(MockCommand::new(event.aggregate_id().clone(), "from saga")),
                )
                .await
        }
    }

    #[tokio::test]
    async fn saga_issues_commands() {
        let commands = Arc::new(MockCommandHandler::new());
        let h = SagaEventHandler::new(Arc::new(Echo), commands.clone());
        assert_eq!(h.handler_type(), "echo_saga");

        let ctx = Context::new();
        let ordered = Event::new("Ordered", Utc::now()).for_aggregate("Order", Id::new(), 1);
        let other = Event::new("Shipped", Utc::now()).for_aggregate("Order", Id::new(), 2);
        h.handle_event(&ctx, &ordered).await.unwrap();
        h.handle_event(&ctx, &other).await.unwrap();

        assert_eq!(
            commands.command_types(),
            vec![CommandType::from_static(MOCK_COMMAND_TYPE)]
        );
    }
}
