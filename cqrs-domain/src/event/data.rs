//! 事件（Event）
//!
//! 事件是不可变的事实记录：类型、可选数据、时间戳、所属聚合标识与版本、元数据。
//! 数据以 `Arc<dyn EventData>` 共享，克隆事件不会复制负载。
//!
use crate::aggregate::AggregateType;
use crate::id::Id;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type_name!(
    /// 事件类型名
    EventType
);

/// 事件数据：任何可序列化、可跨线程共享的类型
pub trait EventData: fmt::Debug + Send + Sync + 'static {
    fn to_json(&self) -> serde_json::Result<Value>;
    fn data_as_any(&self) -> &dyn Any;
}

impl<T> EventData for T
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn data_as_any(&self) -> &dyn Any {
        self
    }
}

/// 元数据：字符串键到 JSON 值
pub type Metadata = BTreeMap<String, Value>;

#[derive(Clone, Debug)]
pub struct Event {
    event_type: EventType,
    data: Option<Arc<dyn EventData>>,
    timestamp: DateTime<Utc>,
    aggregate_type: AggregateType,
    aggregate_id: Id,
    version: usize,
    metadata: Metadata,
}

impl Event {
    /// 不属于任何聚合的事件（例如调度器产生的合成事件）
    pub fn new(event_type: impl Into<EventType>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            data: None,
            timestamp,
            aggregate_type: AggregateType::from_static(""),
            aggregate_id: Id::empty(),
            version: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn new_for_aggregate(
        event_type: impl Into<EventType>,
        data: Option<Arc<dyn EventData>>,
        timestamp: DateTime<Utc>,
        aggregate_type: impl Into<AggregateType>,
        aggregate_id: Id,
        version: usize,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp,
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            version,
            metadata: Metadata::new(),
        }
    }

    pub fn for_aggregate(
        mut self,
        aggregate_type: impl Into<AggregateType>,
        aggregate_id: Id,
        version: usize,
    ) -> Self {
        self.aggregate_type = aggregate_type.into();
        self.aggregate_id = aggregate_id;
        self.version = version;
        self
    }

    pub fn with_data<T: EventData>(mut self, data: T) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    pub fn with_shared_data(mut self, data: Option<Arc<dyn EventData>>) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn data(&self) -> Option<&Arc<dyn EventData>> {
        self.data.as_ref()
    }

    /// 以具体类型借用事件数据
    pub fn data_as<T: 'static>(&self) -> Option<&T> {
        self.data.as_deref()?.data_as_any().downcast_ref::<T>()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &Id {
        &self.aggregate_id
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_type, self.version)
    }
}

/// 数据按 JSON 形态比较
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        let data_eq = match (&self.data, &other.data) {
            (None, None) => true,
            (Some(a), Some(b)) => match (a.to_json(), b.to_json()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
            _ => false,
        };
        data_eq
            && self.event_type == other.event_type
            && self.timestamp == other.timestamp
            && self.aggregate_type == other.aggregate_type
            && self.aggregate_id == other.aggregate_id
            && self.version == other.version
            && self.metadata == other.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ItemAdded {
        description: String,
    }

    #[test]
    fn typed_data_access_and_display() {
        let event = Event::new("ItemAdded", Utc::now())
            .for_aggregate("TodoList", Id::from_raw("t-1"), 2)
            .with_data(ItemAdded {
                description: "milk".into(),
            })
            .with_metadata("source", json!("test"));

        assert_eq!(event.to_string(), "ItemAdded@2");
        assert_eq!(event.data_as::<ItemAdded>().unwrap().description, "milk");
        assert!(event.data_as::<String>().is_none());
        assert_eq!(event.aggregate_type(), "TodoList");
        assert_eq!(event.metadata().get("source"), Some(&json!("test")));
    }

    #[test]
    fn clones_share_data_and_compare_equal() {
        let event = Event::new("Ping", Utc::now()).with_data(json!({"n": 1}));
        let copy = event.clone();
        assert!(Arc::ptr_eq(event.data().unwrap(), copy.data().unwrap()));
        assert_eq!(event, copy);
        assert_ne!(event, copy.clone().with_metadata("k", json!(1)));
    }
}
