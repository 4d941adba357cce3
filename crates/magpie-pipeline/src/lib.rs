pub mod ai;
pub mod filter;
pub mod orchestrator;

pub use ai::{AiOptions, AiPipeline};
pub use filter::filter_jobs;
pub use orchestrator::{Orchestrator, Phase, RunOptions};
