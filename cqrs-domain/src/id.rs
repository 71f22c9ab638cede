//! 标识（Id）
//!
//! 全局可插拔的标识生成/解析策略：
//! - 进程内只有一个生效的 `IdProvider`，启动时通过 `set_id_provider` 设置一次；
//! - 未设置时使用内置的 `UuidIdProvider`（UUID v4）；
//! - 空字符串是保留的“空标识”，任何 provider 都不会生成它。
//!
use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// 不透明、可比较的标识
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// 由当前生效的 provider 生成新标识
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        provider().new_id()
    }

    /// 空标识
    pub fn empty() -> Self {
        Id(String::new())
    }

    /// 由当前生效的 provider 解析
    pub fn parse(s: &str) -> DomainResult<Self> {
        provider().parse(s)
    }

    /// 直接包装字符串，不经过 provider 校验（供 provider 实现与存储适配使用）
    pub fn from_raw(s: impl Into<String>) -> Self {
        Id(s.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 标识生成与解析策略
pub trait IdProvider: Send + Sync {
    fn new_id(&self) -> Id;
    fn parse(&self, s: &str) -> DomainResult<Id>;
}

/// 默认的 UUID v4 策略
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdProvider;

impl IdProvider for UuidIdProvider {
    fn new_id(&self) -> Id {
        Id(uuid::Uuid::new_v4().to_string())
    }

    fn parse(&self, s: &str) -> DomainResult<Id> {
        if s.is_empty() {
            return Ok(Id::empty());
        }
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Id(uuid.to_string()))
    }
}

/// 按时间排序的 UUID v7 策略，适合需要按创建顺序索引的存储
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7IdProvider;

impl IdProvider for UuidV7IdProvider {
    fn new_id(&self) -> Id {
        Id(uuid::Uuid::now_v7().to_string())
    }

    fn parse(&self, s: &str) -> DomainResult<Id> {
        UuidIdProvider.parse(s)
    }
}

static PROVIDER: OnceLock<Arc<dyn IdProvider>> = OnceLock::new();

/// 设置进程级 provider，只能设置一次，且必须早于首次生成/解析
pub fn set_id_provider(provider: Arc<dyn IdProvider>) -> DomainResult<()> {
    PROVIDER
        .set(provider)
        .map_err(|_| DomainError::IdProviderAlreadySet)
}

fn provider() -> &'static Arc<dyn IdProvider> {
    PROVIDER.get_or_init(|| Arc::new(UuidIdProvider))
}
