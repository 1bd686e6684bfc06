pub mod activation;
pub mod dimension;
pub mod engine;
pub mod provider;
pub mod router;
pub mod server;
pub mod session;
pub mod tools;

pub use engine::Engine;
pub use provider::ConfigProvider;
pub use router::{Request, Response, Router, RpcError};
pub use server::StdioServer;
pub use session::{ActiveSession, SessionState};
pub use tools::ToolHandler;
