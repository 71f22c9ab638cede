//! 命令（Command）与命令处理器
//!
//! - `Command`：指向单个聚合的状态变更请求，对象安全，可向下转型为具体类型；
//! - `CommandHandler`：异步处理一条命令；
//! - `CommandHandlerMiddleware`：装饰处理器的中间件，按固定顺序组合；
//! - `CommandRegistry`：命令类型名到构造闭包的注册表，用于从传输数据重建命令。
//!
use crate::aggregate::AggregateType;
use crate::context::Context;
use crate::error::DomainResult;
use crate::id::Id;
use crate::registry::TypeRegistry;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

type_name!(
    /// 命令类型名，全局唯一，作为命令注册表与命令总线的路由键
    CommandType
);

/// 类型擦除辅助：为所有 `'static` 类型提供 `Any` 视图
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// 命令接口
pub trait Command: AsAny + fmt::Debug {
    /// 目标聚合标识
    fn aggregate_id(&self) -> Id;
    /// 目标聚合类型
    fn aggregate_type(&self) -> AggregateType;
    /// 命令类型名
    fn command_type(&self) -> CommandType;
}

impl dyn Command {
    /// 借用为具体命令类型
    pub fn downcast_ref<C: Command>(&self) -> Option<&C> {
        self.as_any().downcast_ref::<C>()
    }

    pub fn is<C: Command>(&self) -> bool {
        self.as_any().is::<C>()
    }

    /// 取回具体命令类型的所有权，失败时原样返回
    pub fn downcast<C: Command>(self: Box<Self>) -> Result<Box<C>, Box<dyn Command>> {
        if self.is::<C>() {
            match self.into_any().downcast::<C>() {
                Ok(cmd) => Ok(cmd),
                // is::<C>() 已确认类型，此分支不会出现
                Err(_) => unreachable!("type checked by is::<C>()"),
            }
        } else {
            Err(self)
        }
    }
}

/// 命令处理器
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(&self, ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()>;
}

type CommandHandlerFuture = BoxFuture<'static, DomainResult<()>>;

/// 以闭包实现的命令处理器，便于编写中间件与测试
pub struct CommandHandlerFn<F> {
    f: F,
}

impl<F> CommandHandlerFn<F>
where
    F: Fn(Context, Box<dyn Command>) -> CommandHandlerFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> CommandHandler for CommandHandlerFn<F>
where
    F: Fn(Context, Box<dyn Command>) -> CommandHandlerFuture + Send + Sync,
{
    async fn handle_command(&self, ctx: &Context, cmd: Box<dyn Command>) -> DomainResult<()> {
        (self.f)(ctx.clone(), cmd).await
    }
}

/// 命令处理器中间件：接收内层处理器，返回包装后的处理器
pub type CommandHandlerMiddleware =
    Arc<dyn Fn(Arc<dyn CommandHandler>) -> Arc<dyn CommandHandler> + Send + Sync>;

/// 组合中间件
///
/// `middleware[0]` 位于最外层：命令先经过第一个中间件，最后到达 `handler`。
pub fn use_command_handler_middleware(
    handler: Arc<dyn CommandHandler>,
    middleware: &[CommandHandlerMiddleware],
) -> Arc<dyn CommandHandler> {
    middleware
        .iter()
        .rev()
        .fold(handler, |inner, m| m(inner))
}

#[derive(Clone)]
struct CommandFactory {
    create: Arc<dyn Fn() -> Box<dyn Command> + Send + Sync>,
    decode: Arc<dyn Fn(serde_json::Value) -> DomainResult<Box<dyn Command>> + Send + Sync>,
}

/// 命令注册表
pub struct CommandRegistry {
    inner: TypeRegistry<CommandFactory>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            inner: TypeRegistry::new("command"),
        }
    }

    /// 进程级默认注册表
    pub fn global() -> Arc<CommandRegistry> {
        static GLOBAL: OnceLock<Arc<CommandRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CommandRegistry::new())).clone()
    }

    /// 注册命令，类型名取自工厂新建实例的 `command_type()`
    pub fn register<C, F>(&self, factory: F) -> DomainResult<()>
    where
        C: Command + DeserializeOwned,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let command_type = factory().command_type();
        let factory = CommandFactory {
            create: Arc::new(move || Box::new(factory()) as Box<dyn Command>),
            decode: Arc::new(|value: serde_json::Value| -> DomainResult<Box<dyn Command>> {
                let cmd: C = serde_json::from_value(value)?;
                Ok(Box::new(cmd) as Box<dyn Command>)
            }),
        };
        self.inner.register(command_type.as_str(), factory)
    }

    pub fn unregister(&self, command_type: &CommandType) -> DomainResult<()> {
        self.inner.unregister(command_type.as_str())
    }

    /// 新建一个零值命令
    pub fn create(&self, command_type: &CommandType) -> DomainResult<Box<dyn Command>> {
        let factory = self.inner.get(command_type.as_str())?;
        Ok((factory.create)())
    }

    /// 从 JSON 负载重建命令
    pub fn decode(
        &self,
        command_type: &CommandType,
        value: serde_json::Value,
    ) -> DomainResult<Box<dyn Command>> {
        let factory = self.inner.get(command_type.as_str())?;
        (factory.decode)(value)
    }

    pub fn contains(&self, command_type: &CommandType) -> bool {
        self.inner.contains(command_type.as_str())
    }

    pub fn command_types(&self) -> Vec<CommandType> {
        self.inner.types().into_iter().map(CommandType::new).collect()
    }
}
