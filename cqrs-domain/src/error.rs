//! 领域层统一错误定义
//!
//! 按注册表、命令、事件、聚合、存储、总线、读模型仓储等分组，
//! 便于各实现层统一转换为 `DomainError` 并通过 `?` 传播。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 类型注册表 ---
    #[error("attempt to register empty {kind} type")]
    EmptyTypeName { kind: &'static str },
    #[error("registering duplicate types for {kind} {type_name:?}")]
    DuplicateType {
        kind: &'static str,
        type_name: String,
    },
    #[error("{kind} not registered: {type_name:?}")]
    NotRegistered {
        kind: &'static str,
        type_name: String,
    },

    // --- 标识 ---
    #[error("invalid id: {reason}")]
    InvalidId { reason: String },
    #[error("id provider already set")]
    IdProviderAlreadySet,

    // --- 命令 ---
    #[error("could not handle command: {command_type}")]
    UnknownCommand { command_type: String },
    #[error("missing aggregate id")]
    MissingAggregateId,
    #[error("mismatched aggregate type: expected={expected}, found={found}")]
    MismatchedAggregateType { expected: String, found: String },
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error("command handler not found: {command_type}")]
    CommandHandlerNotFound { command_type: String },
    #[error("command handler already set: {command_type}")]
    CommandHandlerAlreadySet { command_type: String },
    #[error("aggregate is locked: {aggregate_id}")]
    AggregateLocked { aggregate_id: String },

    // --- 事件与聚合 ---
    #[error("could not apply event: {event_type}")]
    UnknownEvent { event_type: String },
    #[error("incorrect event version: aggregate={aggregate_id}, expected={expected}, found={found}")]
    IncorrectEventVersion {
        aggregate_id: String,
        expected: usize,
        found: usize,
    },
    #[error("mismatched event type: expected aggregate={expected}, found={found}")]
    MismatchedEventType { expected: String, found: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("aggregate not found: type={aggregate_type}, id={aggregate_id}")]
    AggregateNotFound {
        aggregate_type: String,
        aggregate_id: String,
    },

    // --- 事件存储 ---
    #[error("no events to save")]
    NoEvents,
    #[error("events in one batch must share one aggregate id")]
    MismatchedAggregateId,
    #[error("version conflict: aggregate={aggregate_id}, expected={expected}, actual={actual}")]
    VersionConflict {
        aggregate_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("event store error: {reason}")]
    EventStore { reason: String },

    // --- 事件总线 ---
    #[error("missing matcher")]
    MissingMatcher,
    #[error("missing handler")]
    MissingHandler,
    #[error("handler already added: {handler}")]
    HandlerAlreadyAdded { handler: String },
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },
    #[error("context canceled")]
    Cancelled,

    // --- 读模型仓储 ---
    #[error("could not find entity: {id}")]
    EntityNotFound { id: String },
    #[error("missing entity id")]
    MissingEntityId,
    #[error("incorrect entity version: entity={id}, expected={expected}, found={found}")]
    IncorrectEntityVersion {
        id: String,
        expected: usize,
        found: usize,
    },
    #[error("repository error: {reason}")]
    Repository { reason: String },

    // --- 序列化/调度 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
}

impl DomainError {
    /// 是否为乐观并发冲突，调用方可据此“重新加载后重试”
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, DomainError::VersionConflict { .. })
    }

    /// 是否为“未找到”类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::NotRegistered { .. }
                | DomainError::AggregateNotFound { .. }
                | DomainError::EntityNotFound { .. }
                | DomainError::CommandHandlerNotFound { .. }
        )
    }

    pub(crate) fn event_bus(reason: impl Into<String>) -> Self {
        DomainError::EventBus {
            reason: reason.into(),
        }
    }

    pub(crate) fn event_store(reason: impl Into<String>) -> Self {
        DomainError::EventStore {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::InvalidId {
            reason: err.to_string(),
        }
    }
}

impl From<std::num::ParseIntError> for DomainError {
    fn from(err: std::num::ParseIntError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}
