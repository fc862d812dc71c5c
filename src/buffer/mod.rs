pub mod backpressure;
pub mod batch;
pub mod pool;

pub use backpressure::{BackpressureLevel, OnFullPolicy};
pub use batch::{Batch, BatchType};
pub use pool::{BufferPool, BufferPoolSnapshot};
