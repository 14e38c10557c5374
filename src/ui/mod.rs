//! Progress reporting, decoupled from the install flow.

mod output;
mod progress;

pub use output::{ConsoleSink, format_size};
pub use progress::{NoopSink, ProgressSink};
