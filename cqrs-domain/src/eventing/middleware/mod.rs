//! 事件处理器中间件
//!
pub mod cron;
pub mod observer;
pub mod scheduler;
pub mod sequencer;

pub use cron::CronSchedule;
pub use observer::{ObserverHandler, observer_middleware, unique_group};
pub use scheduler::{Schedule, Scheduler, scheduler_middleware};
pub use sequencer::{Sequencer, SequencerConfig, sequencer_middleware};
