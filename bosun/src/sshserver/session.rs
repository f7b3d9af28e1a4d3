//! Per-session classification and dispatch.
//!
//! Each authenticated session is classified exactly once from three
//! booleans and runs one handling mode to completion. When the managed
//! container is not reachable, shell and exec sessions fall back to the
//! host so the instance stays reachable over SSH.

use crate::config::AgentConfig;
use crate::env::ContainerLifecycle;
use crate::error::AgentResult;
use crate::exec::container::ContainerExecutor;
use crate::exec::{host, ExecutionRequest, SessionIo, TtyRequest};
use crate::workspace::EditorWorkspaceConfig;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionClassification {
    pub has_command: bool,
    pub has_pty: bool,
    pub container_reachable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    ContainerShell,
    ContainerShellTty,
    ContainerExec,
    HostShell,
    HostShellTty,
    HostExec,
}

impl SessionClassification {
    pub fn mode(self) -> SessionMode {
        match (self.has_command, self.has_pty, self.container_reachable) {
            (false, true, true) => SessionMode::ContainerShellTty,
            (false, true, false) => SessionMode::HostShellTty,
            (false, false, true) => SessionMode::ContainerShell,
            (false, false, false) => SessionMode::HostShell,
            (true, _, true) => SessionMode::ContainerExec,
            (true, _, false) => SessionMode::HostExec,
        }
    }
}

/// Everything a session needs beyond its own channel state.
pub struct SessionContext {
    pub config: AgentConfig,
    pub executor: ContainerExecutor,
    pub lifecycle: ContainerLifecycle,
}

pub async fn run_session(
    ctx: &Arc<SessionContext>,
    command: Vec<String>,
    pty: Option<TtyRequest>,
    io: SessionIo,
) -> AgentResult<()> {
    // A reachability probe failure downgrades to host mode rather than
    // failing the session; the instance must stay reachable over SSH
    // even when the engine is down.
    let container_reachable = match ctx.lifecycle.is_running().await {
        Ok(running) => running,
        Err(e) => {
            warn!(error = %e, "container reachability probe failed");
            false
        }
    };

    let classification = SessionClassification {
        has_command: !command.is_empty(),
        has_pty: pty.is_some(),
        container_reachable,
    };
    let mode = classification.mode();
    info!(?mode, "session classified");

    let config = &ctx.config;
    let working_dir = config.workspace_dir.display().to_string();

    match mode {
        SessionMode::ContainerShell => {
            let editor_config =
                EditorWorkspaceConfig::load(&config.editor_workspace_config_file)?;

            let request = ExecutionRequest {
                command: vec!["/bin/bash".to_string()],
                tty: None,
                working_dir,
                user: config.user_name.clone(),
                env: Vec::new(),
            };

            ctx.executor
                .run(request, io, editor_config.extensions.recommendations)
                .await
        }
        SessionMode::ContainerShellTty => {
            let request = ExecutionRequest {
                command: vec![
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    motd_login_command(&config.user_name),
                ],
                tty: pty,
                working_dir,
                user: config.user_name.clone(),
                env: Vec::new(),
            };

            ctx.executor.run(request, io, Vec::new()).await
        }
        SessionMode::ContainerExec => {
            let request = ExecutionRequest {
                command,
                tty: None,
                working_dir,
                user: config.user_name.clone(),
                env: Vec::new(),
            };

            ctx.executor.run(request, io, Vec::new()).await
        }
        SessionMode::HostShell | SessionMode::HostShellTty | SessionMode::HostExec => {
            let request = ExecutionRequest {
                command,
                tty: if mode == SessionMode::HostShellTty {
                    pty
                } else {
                    None
                },
                working_dir,
                user: config.user_name.clone(),
                env: Vec::new(),
            };

            host::run_on_host(request, io).await
        }
    }
}

/// Show the instance's message of the day, then start the user's
/// login shell from the password database.
fn motd_login_command(user_name: &str) -> String {
    format!(
        "for i in /etc/update-motd.d/*; do $i; done && $(getent passwd {} | cut -d ':' -f 7)",
        user_name
    )
}

/// Split an exec request's command line into argv, honoring single and
/// double quotes.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut seen_any = false;

    for c in line.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    seen_any = true;
                }
                c if c.is_whitespace() => {
                    if seen_any {
                        words.push(std::mem::take(&mut current));
                        seen_any = false;
                    }
                }
                c => {
                    current.push(c);
                    seen_any = true;
                }
            },
        }
    }

    if seen_any {
        words.push(current);
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(has_command: bool, has_pty: bool, container_reachable: bool) -> SessionMode {
        SessionClassification {
            has_command,
            has_pty,
            container_reachable,
        }
        .mode()
    }

    #[test]
    fn test_shell_sessions_route_into_container_when_reachable() {
        assert_eq!(classify(false, false, true), SessionMode::ContainerShell);
        assert_eq!(classify(false, true, true), SessionMode::ContainerShellTty);
    }

    #[test]
    fn test_shell_sessions_fall_back_to_host() {
        assert_eq!(classify(false, false, false), SessionMode::HostShell);
        assert_eq!(classify(false, true, false), SessionMode::HostShellTty);
    }

    #[test]
    fn test_exec_sessions() {
        assert_eq!(classify(true, false, true), SessionMode::ContainerExec);
        assert_eq!(classify(true, true, true), SessionMode::ContainerExec);
        assert_eq!(classify(true, false, false), SessionMode::HostExec);
    }

    #[test]
    fn test_split_command_line_plain() {
        assert_eq!(split_command_line("ls -la /tmp"), ["ls", "-la", "/tmp"]);
    }

    #[test]
    fn test_split_command_line_quotes() {
        assert_eq!(
            split_command_line("git commit -m 'first commit'"),
            ["git", "commit", "-m", "first commit"]
        );
        assert_eq!(split_command_line("echo \"\""), ["echo", ""]);
    }

    #[test]
    fn test_split_command_line_empty() {
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_motd_login_command_targets_user() {
        let command = motd_login_command("bosun");

        assert!(command.contains("getent passwd bosun"));
        assert!(command.starts_with("for i in /etc/update-motd.d/*"));
    }
}
