pub mod planner;
pub mod rag;

pub use planner::{LinkedResult, PrimaryResult, RetrievalError, RetrievalPlanner, RetrieveParams};
pub use rag::{estimate_tokens, Citation, RagAnswer, RagError, RagGenerator, RagOptions, SharedChat};
