//! 命令总线：命令类型到处理器的路由表
//!
//! 总线本身也是 `CommandHandler`，可以再套一层中间件。
//!
use async_trait::async_trait;
use cqrs_domain::command::{Command, CommandHandler, CommandType};
use cqrs_domain::{Context, DomainError, DomainResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct CommandBus {
    handlers: DashMap<CommandType, Arc<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为命令类型设置处理器，每个类型只能设置一次
    pub fn set_handler(
        &self,
        handler: Arc<dyn CommandHandler>,
        command_type: impl Into<CommandType>,
    ) -> DomainResult<()> {
        let command_type = command_type.into();
        if command_type.is_empty() {
            return Err(DomainError::EmptyTypeName { kind: "command" });
        }
        match self.handlers.entry(command_type) {
            Entry::Occupied(e) => Err(DomainError::CommandHandlerAlreadySet {
                command_type: e.key().to_string(),
            }),
            Entry::Vacant(e) => {
                debug!(command_type = %e.key(), "command handler set");
                e.insert(handler);
                Ok(())
            }
        }
    }

    pub fn command_types(&self) -> Vec<CommandType> {
        let mut types: Vec<CommandType> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

#[async_trait]
impl CommandHandler for CommandBus {
    async fn handle_command(&self, ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()> {
        let command_type = cmd.command_type();
        // 先取出处理器并释放分片锁，再进入处理
        let Some(handler) = self.handlers.get(&command_type).map(|h| h.clone()) else {
            return Err(DomainError::CommandHandlerNotFound {
                command_type: command_type.to_string(),
            });
        };
        handler.handle_command(ctx, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrs_domain::Id;
    use cqrs_domain::mocks::{MOCK_COMMAND_TYPE, MockCommand, MockCommandHandler};

    #[tokio::test]
    async fn routes_by_command_type() {
        let bus = CommandBus::new();
        let inner = Arc::new(MockCommandHandler::new());
        bus.set_handler(inner.clone(), MOCK_COMMAND_TYPE).unwrap();

        bus.handle_command(&Context::new(), Box::new(MockCommand::new(Id::new(), "hi")))
            .await
            .unwrap();
        assert_eq!(inner.command_types(), vec![CommandType::from_static(MOCK_COMMAND_TYPE)]);
    }

    #[tokio::test]
    async fn duplicate_and_missing_handlers() {
        let bus = CommandBus::new();
        bus.set_handler(Arc::new(MockCommandHandler::new()), MOCK_COMMAND_TYPE)
            .unwrap();
        assert!(matches!(
            bus.set_handler(Arc::new(MockCommandHandler::new()), MOCK_COMMAND_TYPE),
            Err(DomainError::CommandHandlerAlreadySet { .. })
        ));
        assert!(matches!(
            bus.set_handler(Arc::new(MockCommandHandler::new()), ""),
            Err(DomainError::EmptyTypeName { .. })
        ));

        let empty = CommandBus::new();
        let err = empty
            .handle_command(&Context::new(), Box::new(MockCommand::new(Id::new(), "hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CommandHandlerNotFound { .. }));
        assert!(err.is_not_found());
    }
}
