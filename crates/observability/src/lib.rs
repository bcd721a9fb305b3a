//! Process-wide logging setup shared by the binaries.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize logging from `LOG_FORMAT` and `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
