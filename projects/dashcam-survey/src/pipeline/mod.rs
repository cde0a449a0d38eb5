// Per-video pipeline: frame records, batching, run state and output

pub mod assemble;
pub mod batching;
pub mod finalize;
pub mod geometry;
pub mod orchestrator;
pub mod run_state;
pub mod types;
