pub mod batch;
pub mod classifier;

pub use batch::{classify_batch, classify_raw_batch, BatchReport};
