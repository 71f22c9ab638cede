//! 命令处理器中间件
//!
mod lock;
mod validator;

pub use lock::lock_middleware;
pub use validator::{ValidatedCommand, command_with_validation, validator_middleware};
