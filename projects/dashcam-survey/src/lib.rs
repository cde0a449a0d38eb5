pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod run_context;
pub mod storage;
pub mod telemetry;
pub mod video;
