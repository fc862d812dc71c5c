#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_possible_wrap,       // Safe in non-negative contexts
    clippy::cast_precision_loss,      // Acceptable for fill ratios
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. QueueConfig in queue module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod buffer;
pub mod config;
pub mod maintenance;
pub mod pipeline;
pub mod queue;
pub mod reliability;
pub mod sink;
pub mod target;
pub mod writer;

// Re-export main types for easy access
pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineError, PipelineHooks};
pub use sink::{LogSink, MemorySink, SharedSink, SinkError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
