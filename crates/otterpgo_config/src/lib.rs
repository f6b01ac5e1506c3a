pub mod pipeline;
pub mod tier;

pub use crate::pipeline::*;
pub use crate::tier::{ThresholdConfig, Tier};
