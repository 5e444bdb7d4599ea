mod consumer;
mod normalize;
mod orchestrator;

pub use consumer::ConsumerError;
pub use normalize::NormalizeError;
pub use orchestrator::OrchestratorError;
