pub mod static_scheduler;
pub mod stats_metrics;

/// Re-export commonly used types from adapters
pub use static_scheduler::{BalancingStrategy, RandomStrategy, RoundRobinStrategy, StaticScheduler};
pub use stats_metrics::MetricsStatsHandler;
