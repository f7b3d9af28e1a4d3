//! bosun shared - constants and control-plane protocol
//!
//! This crate holds the process-wide constants and the generated
//! gRPC types shared between the agent and its companion CLI.

pub mod constants;

// Generated protobuf types
pub mod generated {
    #![allow(clippy::all, unused_qualifications)]
    tonic::include_proto!("bosun.v1");
}

pub use generated::agent_client::AgentClient;
pub use generated::agent_server::{Agent, AgentServer};

pub use generated::*;
