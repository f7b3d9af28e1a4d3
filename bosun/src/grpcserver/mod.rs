//! Control-plane gRPC server on the local Unix socket.
//!
//! The companion CLI reaches it through the SSH tunnel channel, so the
//! listener never binds a network address.

mod build_env;
mod init_instance;

use crate::config::AgentConfig;
use crate::engine::DockerEngine;
use crate::env::{BuildPipeline, ContainerLifecycle};
use crate::error::{AgentError, AgentResult};
use crate::exec::container::ContainerExecutor;
use bosun_shared::generated::agent_server::{Agent, AgentServer};
use bosun_shared::generated::{
    BuildAndStartEnvReply, BuildAndStartEnvRequest, InitInstanceReply, InitInstanceRequest,
};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tonic::{Request, Response, Status};
use tracing::info;

pub struct AgentService {
    config: AgentConfig,
    engine: Arc<DockerEngine>,
}

impl AgentService {
    pub fn new(config: AgentConfig, engine: DockerEngine) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
        }
    }

    fn pipeline(&self) -> BuildPipeline {
        BuildPipeline::new(self.engine.clone(), self.config.clone())
    }

    fn lifecycle(&self) -> ContainerLifecycle {
        ContainerLifecycle::new(self.engine.clone(), self.config.clone())
    }

    fn executor(&self) -> ContainerExecutor {
        ContainerExecutor::new(
            self.engine.docker().clone(),
            self.config.container_name.clone(),
        )
    }
}

/// Bind the Unix socket and serve until the process exits. A stale
/// socket left by a previous run is removed first.
pub async fn listen_and_serve(config: AgentConfig, engine: DockerEngine) -> AgentResult<()> {
    match std::fs::remove_file(&config.grpc_socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(&config.grpc_socket_path)?;
    let incoming = UnixListenerStream::new(listener);

    info!(socket = %config.grpc_socket_path.display(), "control-plane server listening");

    let service = AgentService::new(config, engine);

    tonic::transport::Server::builder()
        .add_service(AgentServer::new(service))
        .serve_with_incoming(incoming)
        .await
        .map_err(|e| AgentError::Transport(format!("control-plane server: {}", e)))
}

type ReplyStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl Agent for AgentService {
    type InitInstanceStream = ReplyStream<InitInstanceReply>;

    async fn init_instance(
        &self,
        request: Request<InitInstanceRequest>,
    ) -> Result<Response<Self::InitInstanceStream>, Status> {
        let (tx, rx) = mpsc::channel(32);
        let config = self.config.clone();
        let request = request.into_inner();

        tokio::spawn(async move {
            if let Err(e) = init_instance::run(&config, &request, &tx).await {
                let _ = tx.send(Err(Status::internal(e.to_string()))).await;
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    type BuildAndStartEnvStream = ReplyStream<BuildAndStartEnvReply>;

    async fn build_and_start_env(
        &self,
        request: Request<BuildAndStartEnvRequest>,
    ) -> Result<Response<Self::BuildAndStartEnvStream>, Status> {
        let (tx, rx) = mpsc::channel(32);
        let config = self.config.clone();
        let pipeline = self.pipeline();
        let lifecycle = self.lifecycle();
        let executor = self.executor();
        let request = request.into_inner();

        tokio::spawn(async move {
            if let Err(e) =
                build_env::run(&config, &pipeline, &lifecycle, &executor, &request, &tx).await
            {
                let _ = tx.send(Err(Status::internal(e.to_string()))).await;
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
