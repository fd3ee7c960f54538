// =====================================================================================
// MONITORING CELL - SCHEDULING METRICS
// =====================================================================================
//
// Services receive an `Arc<dyn MetricsRecorder>` at construction time. Production
// wiring can plug in a real backend; tests use the in-memory recorder and inspect
// its snapshot. The no-op recorder is the default when nothing is configured.
//
// =====================================================================================

pub mod models;
pub mod services;

pub use models::{HistogramSummary, MetricsSnapshot};
pub use services::{InMemoryMetricsRecorder, MetricsRecorder, NoopMetricsRecorder};
