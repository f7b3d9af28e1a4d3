//! Entry point for the bosun agent.

#[cfg(not(target_os = "linux"))]
compile_error!("the bosun agent is Linux-only; build with a Linux target");

use bosun::config::AgentConfig;
use bosun::engine::DockerEngine;
use bosun::error::AgentResult;
use bosun::grpcserver;
use bosun::sshserver::{ShellServer, SystemAuth};
use tracing::{error, info};

#[tokio::main]
async fn main() -> AgentResult<()> {
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    info!("bosun agent starting");

    let config = AgentConfig::default();
    let engine = DockerEngine::connect()?;

    // The control plane is only reachable through the SSH tunnel
    // channel, so losing either server makes the instance unusable.
    // Exit and let the service supervisor restart the whole agent.
    let grpc_config = config.clone();
    let grpc_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = grpcserver::listen_and_serve(grpc_config, grpc_engine).await {
            error!(error = %e, "control-plane server failed");
            std::process::exit(1);
        }
    });

    let auth = SystemAuth::system(&config);
    let server = ShellServer::new(config, auth, engine);
    if let Err(e) = server.listen().await {
        error!(error = %e, "remote-shell server failed");
        return Err(e);
    }

    Ok(())
}
