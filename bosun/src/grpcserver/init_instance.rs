//! First-boot instance initialization.
//!
//! Runs the embedded bootstrap script with the request's identity
//! values in the environment, streams its output line by line, and
//! finishes by returning the SCM public keys the script generated.

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use bosun_shared::generated::{InitInstanceReply, InitInstanceRequest};
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::Status;
use tracing::info;

const SCRIPT_FILE_NAME: &str = "init_instance.sh";
const INIT_SCRIPT: &str = include_str!("../../scripts/init_instance.sh");

pub(super) async fn run(
    config: &AgentConfig,
    request: &InitInstanceRequest,
    tx: &mpsc::Sender<Result<InitInstanceReply, Status>>,
) -> AgentResult<()> {
    info!(env_name_slug = %request.env_name_slug, "initializing instance");

    send(
        tx,
        InitInstanceReply {
            log_line_header: Some(format!("Executing {}", SCRIPT_FILE_NAME)),
            ..Default::default()
        },
    )
    .await?;

    // The script is materialized into a throwaway directory for each
    // run; the write handle is closed before chmod and exec.
    let script_dir = tempfile::tempdir()?;
    let script_path = script_dir.path().join(SCRIPT_FILE_NAME);
    std::fs::write(&script_path, INIT_SCRIPT)?;
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o700))?;

    let mut child = Command::new(&script_path)
        .env("BOSUN_ENV_NAME_SLUG", &request.env_name_slug)
        .env("BOSUN_USER_EMAIL", &request.user_email)
        .env("BOSUN_USER_FULL_NAME", &request.user_full_name)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::Internal("bootstrap stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AgentError::Internal("bootstrap stderr not captured".to_string()))?;

    let stdout_lines = forward_lines(stdout, tx.clone());
    let stderr_lines = forward_lines(stderr, tx.clone());

    let status = child.wait().await?;
    let _ = stdout_lines.await;
    let _ = stderr_lines.await;

    match status.code() {
        Some(0) => {}
        Some(code) => {
            return Err(AgentError::CommandFailed {
                exit_code: i64::from(code),
            })
        }
        None => return Err(AgentError::CommandFailed { exit_code: -1 }),
    }

    let ssh_public_key = tokio::fs::read_to_string(&config.scm_ssh_public_key_file).await?;
    let signing_public_key =
        tokio::fs::read_to_string(&config.scm_signing_public_key_file).await?;

    send(
        tx,
        InitInstanceReply {
            ssh_public_key_content: Some(ssh_public_key),
            signing_public_key_content: Some(signing_public_key),
            ..Default::default()
        },
    )
    .await?;

    info!("instance initialized");
    Ok(())
}

/// Forward each output line as its own reply, keeping the newline the
/// line reader strips.
fn forward_lines<R>(
    reader: R,
    tx: mpsc::Sender<Result<InitInstanceReply, Status>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = InitInstanceReply {
                log_line: Some(format!("{}\n", line)),
                ..Default::default()
            };
            if tx.send(Ok(reply)).await.is_err() {
                break;
            }
        }
    })
}

async fn send(
    tx: &mpsc::Sender<Result<InitInstanceReply, Status>>,
    reply: InitInstanceReply,
) -> AgentResult<()> {
    tx.send(Ok(reply))
        .await
        .map_err(|_| AgentError::Transport("init-instance reply stream closed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The bootstrap script generates the host key the remote-shell
    /// server loads on every later start; the two paths must agree.
    #[test]
    fn test_bootstrap_host_key_path_matches_agent_config() {
        let script_path = INIT_SCRIPT
            .lines()
            .find_map(|line| line.strip_prefix("SSH_HOST_KEY="))
            .map(|value| value.trim_matches('"'))
            .unwrap();

        let config = AgentConfig::default();

        assert_eq!(std::path::Path::new(script_path), config.ssh_host_key_file);
    }
}
