pub mod scheduler;
pub mod stats;

pub use scheduler::{Backend, Scheduler, SchedulerError, SchedulerResult};
pub use stats::StatsHandler;
