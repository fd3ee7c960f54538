pub mod metrics;

pub use metrics::{InMemoryMetricsRecorder, MetricsRecorder, NoopMetricsRecorder};
