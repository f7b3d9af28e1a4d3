//! The build-and-start operation: rebuild the environment image pair
//! and put the managed container back up on the new final image.

use crate::config::AgentConfig;
use crate::env::{run_init_hooks, BuildLogEvent, BuildPipeline, ContainerLifecycle};
use crate::error::AgentResult;
use crate::exec::container::ContainerExecutor;
use crate::workspace::{PreparedWorkspace, WorkspaceConfig};
use bosun_shared::generated::{BuildAndStartEnvReply, BuildAndStartEnvRequest};
use tokio::sync::mpsc;
use tonic::Status;
use tracing::info;

pub(super) async fn run(
    config: &AgentConfig,
    pipeline: &BuildPipeline,
    lifecycle: &ContainerLifecycle,
    executor: &ContainerExecutor,
    request: &BuildAndStartEnvRequest,
    tx: &mpsc::Sender<Result<BuildAndStartEnvReply, Status>>,
) -> AgentResult<()> {
    info!(
        user_config_repo = %request.user_config_repo_name,
        repo = %request.repo_name,
        "building and starting environment"
    );

    // The container holds a reference to the image it was started from;
    // remove it up front so the rebuild can retag freely.
    lifecycle.ensure_removed().await?;

    let workspace = PreparedWorkspace::locate(config, &request.repo_name);

    let user_config_repo = format!(
        "{}/{}",
        request.user_config_repo_owner, request.user_config_repo_name
    );
    let repo = format!("{}/{}", request.repo_owner, request.repo_name);

    let (log_tx, mut log_rx) = mpsc::unbounded_channel();
    let reply_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = log_rx.recv().await {
            let reply = match event {
                BuildLogEvent::Header(text) => BuildAndStartEnvReply {
                    log_line_header: Some(text),
                    log_line: None,
                },
                BuildLogEvent::Line(text) => BuildAndStartEnvReply {
                    log_line_header: None,
                    log_line: Some(text),
                },
            };
            if reply_tx.send(Ok(reply)).await.is_err() {
                break;
            }
        }
    });

    let mut outcome = pipeline
        .run(&workspace, &user_config_repo, &repo, &log_tx)
        .await;

    // The init hooks only run on a fresh container from a successful
    // build; their output goes through the same log stream.
    if outcome.is_ok() {
        outcome = start_and_run_hooks(config, lifecycle, executor, &log_tx).await;
    }

    // Let buffered output drain before reporting the outcome.
    drop(log_tx);
    let _ = forwarder.await;
    outcome?;

    info!("environment container is up");
    Ok(())
}

async fn start_and_run_hooks(
    config: &AgentConfig,
    lifecycle: &ContainerLifecycle,
    executor: &ContainerExecutor,
    log_tx: &mpsc::UnboundedSender<BuildLogEvent>,
) -> AgentResult<()> {
    lifecycle.ensure_running().await?;

    let workspace_config = WorkspaceConfig::load(&config.workspace_config_file)?;
    run_init_hooks(executor, config, &workspace_config, log_tx).await
}
