//! 事件数据注册表（EventDataRegistry）
//!
//! 事件类型名到数据构造/解码闭包的映射，用于从持久化或传输数据还原具体类型。
//!
use super::{EventData, EventType};
use crate::error::DomainResult;
use crate::registry::TypeRegistry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, OnceLock};

type CreateFn = Arc<dyn Fn() -> Arc<dyn EventData> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(serde_json::Value) -> DomainResult<Arc<dyn EventData>> + Send + Sync>;

#[derive(Clone)]
struct EventDataFactory {
    create: CreateFn,
    decode: DecodeFn,
}

pub struct EventDataRegistry {
    inner: TypeRegistry<EventDataFactory>,
}

impl Default for EventDataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDataRegistry {
    pub fn new() -> Self {
        Self {
            inner: TypeRegistry::new("event"),
        }
    }

    /// 进程级默认注册表
    pub fn global() -> Arc<EventDataRegistry> {
        static GLOBAL: OnceLock<Arc<EventDataRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EventDataRegistry::new())).clone()
    }

    pub fn register<T, F>(&self, event_type: EventType, factory: F) -> DomainResult<()>
    where
        T: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory = EventDataFactory {
            create: Arc::new(move || Arc::new(factory()) as Arc<dyn EventData>),
            decode: Arc::new(|value: serde_json::Value| -> DomainResult<Arc<dyn EventData>> {
                let data: T = serde_json::from_value(value)?;
                Ok(Arc::new(data) as Arc<dyn EventData>)
            }),
        };
        self.inner.register(event_type.as_str(), factory)
    }

    pub fn unregister(&self, event_type: &EventType) -> DomainResult<()> {
        self.inner.unregister(event_type.as_str())
    }

    /// 新建零值数据
    pub fn create(&self, event_type: &EventType) -> DomainResult<Arc<dyn EventData>> {
        let factory = self.inner.get(event_type.as_str())?;
        Ok((factory.create)())
    }

    pub fn decode(
        &self,
        event_type: &EventType,
        value: serde_json::Value,
    ) -> DomainResult<Arc<dyn EventData>> {
        let factory = self.inner.get(event_type.as_str())?;
        (factory.decode)(value)
    }

    pub fn contains(&self, event_type: &EventType) -> bool {
        self.inner.contains(event_type.as_str())
    }
}
