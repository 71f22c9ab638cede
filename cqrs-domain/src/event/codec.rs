//! 事件编解码器（EventCodec）
//!
//! 在字节序列与领域事件之间转换，供外部传输/存储适配层使用。
//! 带数据的事件需要其类型已在 `EventDataRegistry` 中注册；无数据事件无需注册。
//!
use super::{Event, EventDataRegistry, SerializedEvent};
use crate::error::DomainResult;
use std::sync::Arc;

pub trait EventCodec: Send + Sync {
    fn marshal_event(&self, event: &Event) -> DomainResult<Vec<u8>>;
    fn unmarshal_event(&self, bytes: &[u8]) -> DomainResult<Event>;
}

/// JSON 编解码器
#[derive(Clone)]
pub struct JsonEventCodec {
    registry: Arc<EventDataRegistry>,
}

impl JsonEventCodec {
    pub fn new(registry: Arc<EventDataRegistry>) -> Self {
        Self { registry }
    }
}

impl EventCodec for JsonEventCodec {
    fn marshal_event(&self, event: &Event) -> DomainResult<Vec<u8>> {
        let envelope = SerializedEvent::from_event(event)?;
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn unmarshal_event(&self, bytes: &[u8]) -> DomainResult<Event> {
        let envelope: SerializedEvent = serde_json::from_slice(bytes)?;
        envelope.into_event(&self.registry)
    }
}
