//! Repository init hooks, run inside the container once it is back up
//! after a rebuild.
//!
//! The workspace collaborator installs hook scripts when it assembles
//! the workspace and records them in the workspace manifest; the agent
//! only executes them. Each repository contributes at most its first
//! hook.

use super::BuildLogEvent;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::exec::container::ContainerExecutor;
use crate::exec::{session_io, ExecutionRequest, SessionIoHandles};
use crate::workspace::WorkspaceConfig;
use tokio::sync::mpsc;
use tracing::info;

/// One planned hook execution.
struct HookRun {
    repo: String,
    header: String,
    request: ExecutionRequest,
}

/// Run every repository's init hook in manifest order, streaming hook
/// output to `log`. The first failing hook aborts the rest.
pub async fn run_init_hooks(
    executor: &ContainerExecutor,
    config: &AgentConfig,
    workspace_config: &WorkspaceConfig,
    log: &mpsc::UnboundedSender<BuildLogEvent>,
) -> AgentResult<()> {
    for run in plan_hook_runs(config, workspace_config) {
        info!(repo = %run.repo, "running init hook");
        let _ = log.send(BuildLogEvent::Header(run.header));

        let (io, handles) = session_io(false);
        let SessionIoHandles {
            stdin,
            mut stdout,
            mut stderr,
            resize: _,
        } = handles;

        let stdout_log = log.clone();
        let stdout_lines = tokio::spawn(async move {
            while let Some(chunk) = stdout.recv().await {
                let line = String::from_utf8_lossy(&chunk).into_owned();
                if stdout_log.send(BuildLogEvent::Line(line)).is_err() {
                    break;
                }
            }
        });
        let stderr_log = log.clone();
        let stderr_lines = tokio::spawn(async move {
            while let Some(chunk) = stderr.recv().await {
                let line = String::from_utf8_lossy(&chunk).into_owned();
                if stderr_log.send(BuildLogEvent::Line(line)).is_err() {
                    break;
                }
            }
        });

        let outcome = executor.run(run.request, io, Vec::new()).await;

        // The hook takes no input; closing the unused sender lets the
        // executor's stdin relay wind down.
        drop(stdin);
        let _ = stdout_lines.await;
        let _ = stderr_lines.await;

        match outcome {
            Ok(()) => {}
            Err(AgentError::CommandFailed { exit_code }) => {
                return Err(AgentError::HookFailed {
                    repo: run.repo,
                    exit_code,
                })
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Plan the hook executions for a manifest: repositories without hooks
/// are skipped, and only the first hook of each repository runs.
fn plan_hook_runs(config: &AgentConfig, workspace_config: &WorkspaceConfig) -> Vec<HookRun> {
    workspace_config
        .repositories
        .iter()
        .filter_map(|repo| {
            let hook = repo.hooks.first()?;
            Some(HookRun {
                repo: format!("{}/{}", repo.owner, repo.name),
                header: format!(
                    "Running {}/{}/{}/{}/{}",
                    repo.owner,
                    repo.name,
                    config.repo_config_dir_name,
                    config.repo_hooks_dir_name,
                    config.init_hook_file_name,
                ),
                request: ExecutionRequest {
                    command: vec![hook.script_file_path.clone()],
                    tty: None,
                    working_dir: hook.script_working_dir_path.clone(),
                    user: config.user_name.clone(),
                    env: Vec::new(),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{WorkspaceHook, WorkspaceRepository};

    fn manifest(repos: Vec<WorkspaceRepository>) -> WorkspaceConfig {
        WorkspaceConfig {
            repositories: repos,
        }
    }

    fn repo(owner: &str, name: &str, hooks: Vec<WorkspaceHook>) -> WorkspaceRepository {
        WorkspaceRepository {
            owner: owner.to_string(),
            name: name.to_string(),
            hooks,
        }
    }

    fn hook(script: &str, working_dir: &str) -> WorkspaceHook {
        WorkspaceHook {
            script_file_path: script.to_string(),
            script_working_dir_path: working_dir.to_string(),
        }
    }

    #[test]
    fn test_repositories_without_hooks_are_skipped() {
        let config = AgentConfig::default();
        let manifest = manifest(vec![
            repo("bosunhq", "docs", vec![]),
            repo(
                "bosunhq",
                "agent",
                vec![hook("/w/agent/.bosun/hooks/init.sh", "/w/agent")],
            ),
        ]);

        let runs = plan_hook_runs(&config, &manifest);

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].repo, "bosunhq/agent");
    }

    #[test]
    fn test_only_the_first_hook_of_a_repository_runs() {
        let config = AgentConfig::default();
        let manifest = manifest(vec![repo(
            "bosunhq",
            "agent",
            vec![
                hook("/w/agent/.bosun/hooks/init.sh", "/w/agent"),
                hook("/w/agent/.bosun/hooks/other.sh", "/w/agent"),
            ],
        )]);

        let runs = plan_hook_runs(&config, &manifest);

        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0].request.command,
            vec!["/w/agent/.bosun/hooks/init.sh"]
        );
    }

    #[test]
    fn test_hook_run_shape() {
        let config = AgentConfig::default();
        let manifest = manifest(vec![repo(
            "bosunhq",
            "agent",
            vec![hook("/w/agent/.bosun/hooks/init.sh", "/w/agent")],
        )]);

        let runs = plan_hook_runs(&config, &manifest);

        assert_eq!(
            runs[0].header,
            "Running bosunhq/agent/.bosun/hooks/init.sh"
        );
        assert!(runs[0].request.tty.is_none());
        assert_eq!(runs[0].request.working_dir, "/w/agent");
        assert_eq!(runs[0].request.user, config.user_name);
    }
}
