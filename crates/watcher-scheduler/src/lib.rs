pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{ActivationTrigger, ReflectionScheduler};
pub use error::{Result, SchedulerError};
pub use schedule::next_fire_after;
