//! 事件匹配器（EventMatcher）
//!
//! 总线对每个到达的事件求值，决定是否投递给某个处理器。
//!
use crate::aggregate::AggregateType;
use crate::event::{Event, EventType};
use std::fmt;
use std::sync::Arc;

pub type MatchFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum EventMatcher {
    /// 匹配所有事件
    All,
    /// 匹配任一给定事件类型
    Events(Vec<EventType>),
    /// 匹配任一给定聚合类型产生的事件
    Aggregates(Vec<AggregateType>),
    /// 任一子匹配器命中即可
    Any(Vec<EventMatcher>),
    /// 所有子匹配器均需命中
    Every(Vec<EventMatcher>),
    /// 自定义谓词
    Custom(MatchFn),
}

impl EventMatcher {
    pub fn events<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        EventMatcher::Events(types.into_iter().map(Into::into).collect())
    }

    pub fn aggregates<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AggregateType>,
    {
        EventMatcher::Aggregates(types.into_iter().map(Into::into).collect())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        EventMatcher::Custom(Arc::new(f))
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventMatcher::All => true,
            EventMatcher::Events(types) => types.iter().any(|t| t == event.event_type()),
            EventMatcher::Aggregates(types) => types.iter().any(|t| t == event.aggregate_type()),
            EventMatcher::Any(matchers) => matchers.iter().any(|m| m.matches(event)),
            EventMatcher::Every(matchers) => matchers.iter().all(|m| m.matches(event)),
            EventMatcher::Custom(f) => f(event),
        }
    }

    /// 结构上不可能命中任何事件（总线视其为缺失匹配器）
    pub fn is_unsatisfiable(&self) -> bool {
        match self {
            EventMatcher::All | EventMatcher::Custom(_) => false,
            EventMatcher::Events(types) => types.is_empty(),
            EventMatcher::Aggregates(types) => types.is_empty(),
            EventMatcher::Any(matchers) => matchers.iter().all(EventMatcher::is_unsatisfiable),
            EventMatcher::Every(matchers) => matchers.iter().any(EventMatcher::is_unsatisfiable),
        }
    }
}

/// 结构相等；`Custom` 按谓词实例（同一个 `Arc`）比较
impl PartialEq for EventMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EventMatcher::All, EventMatcher::All) => true,
            (EventMatcher::Events(a), EventMatcher::Events(b)) => a == b,
            (EventMatcher::Aggregates(a), EventMatcher::Aggregates(b)) => a == b,
            (EventMatcher::Any(a), EventMatcher::Any(b)) => a == b,
            (EventMatcher::Every(a), EventMatcher::Every(b)) => a == b,
            (EventMatcher::Custom(a), EventMatcher::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for EventMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventMatcher::All => f.write_str("All"),
            EventMatcher::Events(types) => f.debug_tuple("Events").field(types).finish(),
            EventMatcher::Aggregates(types) => f.debug_tuple("Aggregates").field(types).finish(),
            EventMatcher::Any(matchers) => f.debug_tuple("Any").field(matchers).finish(),
            EventMatcher::Every(matchers) => f.debug_tuple("Every").field(matchers).finish(),
            EventMatcher::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
