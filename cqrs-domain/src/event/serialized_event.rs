//! 事件传输/持久化信封（SerializedEvent）
//!
//! 与后端无关的自描述形态，任何编解码器都应能无损往返：
//! `{event_type, data, timestamp, aggregate_type, aggregate_id, version, metadata}`。
//!
use super::{Event, EventDataRegistry, EventType, Metadata};
use crate::aggregate::AggregateType;
use crate::error::DomainResult;
use crate::id::Id;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// 事件类型
    #[builder(into)]
    event_type: String,
    /// 事件数据，无数据的事件为 `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    /// 事件发生时间
    timestamp: DateTime<Utc>,
    /// 聚合类型
    #[builder(into, default)]
    aggregate_type: String,
    /// 聚合标识
    #[builder(into, default)]
    aggregate_id: String,
    /// 聚合版本
    #[builder(default)]
    version: usize,
    /// 元数据
    #[serde(default)]
    #[builder(default)]
    metadata: Metadata,
}

impl SerializedEvent {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// 由领域事件生成信封
    pub fn from_event(event: &Event) -> DomainResult<Self> {
        let data = match event.data() {
            Some(data) => Some(data.to_json()?),
            None => None,
        };
        Ok(Self {
            event_type: event.event_type().to_string(),
            data,
            timestamp: event.timestamp(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id().to_string(),
            version: event.version(),
            metadata: event.metadata().clone(),
        })
    }

    /// 还原领域事件，数据经由注册表解码为具体类型
    pub fn into_event(self, registry: &EventDataRegistry) -> DomainResult<Event> {
        let event_type = EventType::new(self.event_type);
        let data = match self.data {
            Some(value) => Some(registry.decode(&event_type, value)?),
            None => None,
        };
        let mut event = Event::new_for_aggregate(
            event_type,
            data,
            self.timestamp,
            AggregateType::new(self.aggregate_type),
            Id::from_raw(self.aggregate_id),
            self.version,
        );
        for (key, value) in self.metadata {
            event = event.with_metadata(key, value);
        }
        Ok(event)
    }
}
