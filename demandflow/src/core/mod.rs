//! Core types shared by stages and the pipeline executor.

mod output;
mod status;

pub use output::StageOutput;
pub use status::StageStatus;
