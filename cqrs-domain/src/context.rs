//! 调用上下文（Context）
//!
//! 贯穿命令处理、存储与事件分发的横切信息：
//! - 命名空间：存储与总线据此隔离数据，缺省为 `DEFAULT_NAMESPACE`；
//! - 取消令牌：长驻组件（总线、调度器、定序器）据此停止接收新任务；
//! - 附加值：字符串键到 JSON 值的映射，随事件一并传递给处理器。
//!
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// 未指定命名空间时使用的默认值
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Clone, Debug, Default)]
pub struct Context {
    namespace: Option<Arc<str>>,
    token: CancellationToken,
    values: Arc<BTreeMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回带有指定命名空间的新上下文，令牌与附加值保持共享
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        let namespace: String = namespace.into();
        Self {
            namespace: Some(Arc::from(namespace)),
            ..self.clone()
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// 写时复制地附加一个值
    pub fn with_value(&self, key: impl Into<String>, value: Value) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key.into(), value);
        Self {
            values: Arc::new(values),
            ..self.clone()
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// 派生子上下文：取消父上下文会连带取消子上下文，反之不影响父上下文
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    /// 使用给定令牌替换当前令牌
    pub fn with_token(&self, token: CancellationToken) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
