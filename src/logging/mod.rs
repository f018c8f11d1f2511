pub mod request_logger;
pub mod usage_log;

pub use request_logger::RequestLogger;
#[cfg(test)]
pub use usage_log::MemoryUsageSink;
pub use usage_log::{TracingUsageSink, UsageRecord, UsageStatus};
