pub mod duration;
pub mod graceful_shutdown;

pub use graceful_shutdown::ShutdownSignal;
