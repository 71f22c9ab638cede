//! 校验中间件
//!
//! 以 `command_with_validation` 包装的命令在进入内层处理器前执行校验，
//! 校验失败时直接把错误返回给调用方；通过后把原命令交给内层处理器。
//! 未包装的命令原样透传。
//!
use async_trait::async_trait;
use cqrs_domain::aggregate::AggregateType;
use cqrs_domain::command::{Command, CommandHandler, CommandHandlerMiddleware, CommandType};
use cqrs_domain::{Context, DomainResult, Id};
use std::fmt;
use std::sync::Arc;

type ValidateFn = Box<dyn Fn(&dyn Command) -> DomainResult<()> + Send + Sync>;

pub struct ValidatedCommand {
    inner: Box<dyn Command>,
    validate: ValidateFn,
}

impl ValidatedCommand {
    pub fn validate(&self) -> DomainResult<()> {
        (self.validate)(self.inner.as_ref())
    }

    pub fn inner(&self) -> &dyn Command {
        self.inner.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn Command> {
        self.inner
    }
}

impl fmt::Debug for ValidatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedCommand")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Command for ValidatedCommand {
    fn aggregate_id(&self) -> Id {
        self.inner.aggregate_id()
    }

    fn aggregate_type(&self) -> AggregateType {
        self.inner.aggregate_type()
    }

    fn command_type(&self) -> CommandType {
        self.inner.command_type()
    }
}

/// 为命令附加校验函数
pub fn command_with_validation<F>(cmd: Box<dyn Command>, validate: F) -> Box<dyn Command>
where
    F: Fn(&dyn Command) -> DomainResult<()> + Send + Sync + 'static,
{
    Box::new(ValidatedCommand {
        inner: cmd,
        validate: Box::new(validate),
    })
}

pub fn validator_middleware() -> CommandHandlerMiddleware {
    Arc::new(|inner: Arc<dyn CommandHandler>| {
        Arc::new(Validator { inner }) as Arc<dyn CommandHandler>
    })
}

struct Validator {
    inner: Arc<dyn CommandHandler>,
}

#[async_trait]
impl CommandHandler for Validator {
    async fn handle_command(&self, ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()> {
        let cmd = match cmd.downcast::<ValidatedCommand>() {
            Ok(validated) => {
                validated.validate()?;
                validated.into_inner()
            }
            Err(cmd) => cmd,
        };
        self.inner.handle_command(ctx, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrs_domain::DomainError;
    use cqrs_domain::command::use_command_handler_middleware;
    use cqrs_domain::mocks::{MockCommand, MockCommandHandler};

    fn setup() -> (Arc<MockCommandHandler>, Arc<dyn CommandHandler>) {
        let inner = Arc::new(MockCommandHandler::new());
        let h = use_command_handler_middleware(inner.clone(), &[validator_middleware()]);
        (inner, h)
    }

    #[tokio::test]
    async fn plain_commands_pass_through() {
        let (inner, h) = setup();
        h.handle_command(&Context::new(), Box::new(MockCommand::new(Id::new(), "c")))
            .await
            .unwrap();
        assert_eq!(inner.len(), 1);
    }

    #[tokio::test]
    async fn validation_error_aborts() {
        let (inner, h) = setup();
        let cmd = command_with_validation(Box::new(MockCommand::new(Id::new(), "c")), |_| {
            Err(DomainError::Validation {
                reason: "a validation error".into(),
            })
        });
        let err = h.handle_command(&Context::new(), cmd).await.unwrap_err();
        assert_eq!(err.to_string(), "validation failed: a validation error");
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn validated_command_reaches_inner_unwrapped() {
        let (inner, h) = setup();
        let id = Id::new();
        let cmd = command_with_validation(Box::new(MockCommand::new(id.clone(), "c")), |cmd| {
            match cmd.downcast_ref::<MockCommand>() {
                Some(c) if !c.content.is_empty() => Ok(()),
                _ => Err(DomainError::Validation {
                    reason: "content required".into(),
                }),
            }
        });
        h.handle_command(&Context::new(), cmd).await.unwrap();

        let handled = inner.take();
        assert_eq!(handled.len(), 1);
        let cmd = handled[0].downcast_ref::<MockCommand>().unwrap();
        assert_eq!(cmd, &MockCommand::new(id, "c"));
    }
}
