use super::AggregateType;
use crate::event::{Event, EventData, EventType};
use crate::id::Id;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 聚合公共部分：标识、类型、版本与未提交事件缓冲
///
/// 具体聚合以字段形式组合本结构，并通过 `Aggregate::base/base_mut` 暴露。
#[derive(Debug, Clone)]
pub struct AggregateBase {
    id: Id,
    aggregate_type: AggregateType,
    version: usize,
    events: Vec<Event>,
}

impl AggregateBase {
    pub fn new(aggregate_type: impl Into<AggregateType>, id: Id) -> Self {
        Self {
            id,
            aggregate_type: aggregate_type.into(),
            version: 0,
            events: Vec::new(),
        }
    }

    pub fn entity_id(&self) -> &Id {
        &self.id
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    /// 已应用的最高事件版本，新聚合为 0
    pub fn aggregate_version(&self) -> usize {
        self.version
    }

    /// 仅由聚合存储在应用事件后推进
    pub fn set_aggregate_version(&mut self, version: usize) {
        self.version = version;
    }

    /// 追加一个未提交事件，版本为 `当前版本 + 已缓冲数量 + 1`
    pub fn append_event<T: EventData>(
        &mut self,
        event_type: impl Into<EventType>,
        data: T,
        timestamp: DateTime<Utc>,
    ) -> Event {
        self.append(event_type.into(), Some(Arc::new(data)), timestamp)
    }

    /// 追加一个不带数据的未提交事件
    pub fn append_empty_event(
        &mut self,
        event_type: impl Into<EventType>,
        timestamp: DateTime<Utc>,
    ) -> Event {
        self.append(event_type.into(), None, timestamp)
    }

    fn append(
        &mut self,
        event_type: EventType,
        data: Option<Arc<dyn EventData>>,
        timestamp: DateTime<Utc>,
    ) -> Event {
        let event = Event::new_for_aggregate(
            event_type,
            data,
            timestamp,
            self.aggregate_type.clone(),
            self.id.clone(),
            self.next_version(),
        );
        self.events.push(event.clone());
        event
    }

    fn next_version(&self) -> usize {
        self.version + self.events.len() + 1
    }

    pub fn uncommitted_events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear_uncommitted_events(&mut self) {
        self.events.clear();
    }

    /// 丢弃 `len` 之后追加的事件（命令处理失败时回滚）
    pub fn truncate_uncommitted_events(&mut self, len: usize) {
        self.events.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appended_versions_follow_buffer() {
        let mut base = AggregateBase::new("Counter", Id::from_raw("c-1"));
        base.set_aggregate_version(4);

        let first = base.append_event("Incremented", json!({"by": 1}), Utc::now());
        let second = base.append_empty_event("Reset", Utc::now());
        assert_eq!(first.version(), 5);
        assert_eq!(second.version(), 6);
        assert_eq!(second.aggregate_id(), &Id::from_raw("c-1"));
        assert_eq!(base.uncommitted_events().len(), 2);

        base.truncate_uncommitted_events(1);
        assert_eq!(base.uncommitted_events(), &[first]);
        base.clear_uncommitted_events();
        assert!(base.uncommitted_events().is_empty());
        assert_eq!(base.aggregate_version(), 4);
    }
}
