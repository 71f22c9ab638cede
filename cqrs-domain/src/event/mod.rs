//! 事件模型
//!
//! - `data`：不可变事件与事件数据
//! - `serialized_event`：与后端无关的传输信封
//! - `registry`：事件数据注册表
//! - `codec`：字节编解码器
//!
mod codec;
mod data;
mod registry;
mod serialized_event;

pub use codec::{EventCodec, JsonEventCodec};
pub use data::{Event, EventData, EventType, Metadata};
pub use registry::EventDataRegistry;
pub use serialized_event::SerializedEvent;
