pub mod scoring_flow;
pub mod task_ctx;

pub use scoring_flow::{FlowOutcome, RetryPolicy, ScoringFlow, TaskRequest};
pub use task_ctx::TaskCtx;
