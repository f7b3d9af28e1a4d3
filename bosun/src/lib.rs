//! bosun agent library.
//!
//! The agent turns the instance it runs on into a container-backed
//! remote development environment: it builds the environment image
//! pair, keeps one managed container up, answers SSH sessions, and
//! exposes a control plane on a local Unix socket.

pub mod config;
pub mod dockerfile;
pub mod engine;
pub mod env;
pub mod error;
pub mod exec;
pub mod grpcserver;
pub mod sshserver;
pub mod workspace;

pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
