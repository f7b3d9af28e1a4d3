//! Execution inside the managed container via the engine's exec API.

use super::relay::Race;
use super::{ExecutionRequest, SessionIo};
use crate::error::{AgentError, AgentResult};
use bollard::exec::{
    CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults,
};
use bollard::container::LogOutput;
use bollard::Docker;
use futures::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Marker the editor client sends when bootstrapping its server over
/// the session.
const EDITOR_BOOTSTRAP_MARKER: &str = "--start-server";

pub struct ContainerExecutor {
    docker: Docker,
    container_name: String,
}

impl ContainerExecutor {
    pub fn new(docker: Docker, container_name: String) -> Self {
        Self {
            docker,
            container_name,
        }
    }

    /// Create an execution, attach, relay until the first direction
    /// settles, then surface the execution's exit code.
    ///
    /// `editor_extensions`, when non-empty, enables the inbound
    /// editor-bootstrap line splice; only the non-terminal in-container
    /// shell flavor passes it.
    pub async fn run(
        &self,
        request: ExecutionRequest,
        mut io: SessionIo,
        editor_extensions: Vec<String>,
    ) -> AgentResult<()> {
        let tty = request.tty.is_some();

        let mut env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if let Some(tty_request) = &request.tty {
            env.push(format!("TERM={}", tty_request.term));
        }

        let exec = self
            .docker
            .create_exec(
                &self.container_name,
                CreateExecOptions::<String> {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(tty),
                    cmd: Some(request.command.clone()),
                    env: Some(env),
                    working_dir: Some(request.working_dir.clone()),
                    user: Some(request.user.clone()),
                    privileged: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        let exec_id = exec.id;

        debug!(exec_id = %exec_id, tty, "attaching to container execution");

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = self
            .docker
            .start_exec(
                &exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty,
                    output_capacity: None,
                }),
            )
            .await?
        else {
            return Err(AgentError::Internal(
                "expected attached execution, got detached".to_string(),
            ));
        };

        let race = Race::new();

        let mut stdin = io.stdin;
        let mut splicer = (!tty && !editor_extensions.is_empty())
            .then(|| LineSplicer::new(editor_extensions));
        race.spawn(async move {
            while let Some(chunk) = stdin.recv().await {
                let bytes = match splicer.as_mut() {
                    Some(splicer) => splicer.push(&chunk),
                    None => chunk,
                };
                if bytes.is_empty() {
                    continue;
                }
                input
                    .write_all(&bytes)
                    .await
                    .map_err(|e| AgentError::Transport(format!("exec stdin write: {}", e)))?;
            }
            // Client closed its input; read-EOF counts as success.
            Ok(())
        });

        let stdout = io.stdout.clone();
        let stderr = io.stderr.clone();
        race.spawn(async move {
            while let Some(record) = output.next().await {
                let record =
                    record.map_err(|e| AgentError::Transport(format!("exec output: {}", e)))?;
                let (tx, message) = match record {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        (&stdout, message)
                    }
                    LogOutput::StdErr { message } => (&stderr, message),
                    LogOutput::StdIn { .. } => continue,
                };
                if tx.send(message.to_vec()).is_err() {
                    break;
                }
            }
            Ok(())
        });

        if tty {
            if let Some(mut resize) = io.resize.take() {
                let docker = self.docker.clone();
                let exec_id = exec_id.clone();
                race.spawn(async move {
                    while let Some(size) = resize.recv().await {
                        docker
                            .resize_exec(
                                &exec_id,
                                ResizeExecOptions {
                                    height: size.height,
                                    width: size.width,
                                },
                            )
                            .await?;
                    }
                    Ok(())
                });
            }
        }

        race.first().await?;

        let inspect = self.docker.inspect_exec(&exec_id).await?;
        exec_outcome(inspect.exit_code)
    }
}

/// Map an inspected exit code to the session outcome. A still-missing
/// code means the engine saw no abnormal end.
fn exec_outcome(exit_code: Option<i64>) -> AgentResult<()> {
    match exit_code {
        Some(0) | None => Ok(()),
        Some(exit_code) => Err(AgentError::CommandFailed { exit_code }),
    }
}

/// Line-buffering rewriter for the editor-bootstrap splice.
///
/// Bytes are forwarded a full line at a time; a line carrying the
/// bootstrap marker gets an `--install-extension` flag per recommended
/// extension spliced in after it.
struct LineSplicer {
    buf: Vec<u8>,
    extensions: Vec<String>,
}

impl LineSplicer {
    fn new(extensions: Vec<String>) -> Self {
        Self {
            buf: Vec::new(),
            extensions,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    out.extend_from_slice(
                        rewrite_editor_bootstrap_line(text, &self.extensions).as_bytes(),
                    );
                }
                // Not text; forward untouched.
                Err(_) => out.extend_from_slice(&line),
            }
        }
        out
    }
}

/// Splice `--install-extension` flags after the bootstrap marker, if
/// present. Lines without the marker pass through unchanged.
fn rewrite_editor_bootstrap_line(line: &str, extensions: &[String]) -> String {
    static MARKER: OnceLock<Regex> = OnceLock::new();

    if extensions.is_empty() {
        return line.to_string();
    }

    let marker = MARKER.get_or_init(|| Regex::new(EDITOR_BOOTSTRAP_MARKER).expect("marker pattern"));
    if !marker.is_match(line) {
        return line.to_string();
    }

    let flags: Vec<String> = extensions
        .iter()
        .map(|ext| format!("--install-extension {}", ext))
        .collect();
    let replacement = format!("{} {}", EDITOR_BOOTSTRAP_MARKER, flags.join(" "));

    marker.replace_all(line, replacement.as_str()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensions(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bootstrap_line_gets_extension_flags() {
        let line = "sh bootstrap.sh --start-server --port 0\n";

        let rewritten =
            rewrite_editor_bootstrap_line(line, &extensions(&["golang.go", "rust-lang.rust-analyzer"]));

        assert_eq!(
            rewritten,
            "sh bootstrap.sh --start-server --install-extension golang.go \
             --install-extension rust-lang.rust-analyzer --port 0\n"
        );
    }

    #[test]
    fn test_line_without_marker_unchanged() {
        let line = "ls -la\n";

        assert_eq!(
            rewrite_editor_bootstrap_line(line, &extensions(&["golang.go"])),
            line
        );
    }

    #[test]
    fn test_no_extensions_means_no_rewrite() {
        let line = "run --start-server now\n";

        assert_eq!(rewrite_editor_bootstrap_line(line, &[]), line);
    }

    #[test]
    fn test_splicer_buffers_partial_lines() {
        let mut splicer = LineSplicer::new(extensions(&["golang.go"]));

        assert!(splicer.push(b"run --start").is_empty());
        let out = splicer.push(b"-server now\necho done\n");

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "run --start-server --install-extension golang.go now\necho done\n"
        );
    }

    #[test]
    fn test_splicer_forwards_non_utf8_lines_untouched() {
        let mut splicer = LineSplicer::new(extensions(&["golang.go"]));

        let out = splicer.push(b"\xff\xfe\n");

        assert_eq!(out, b"\xff\xfe\n");
    }

    #[test]
    fn test_exec_outcome_surfaces_exit_code() {
        let err = exec_outcome(Some(2)).unwrap_err();

        assert!(matches!(err, AgentError::CommandFailed { exit_code: 2 }));
    }

    #[test]
    fn test_exec_outcome_zero_and_missing_codes_succeed() {
        assert!(exec_outcome(Some(0)).is_ok());
        assert!(exec_outcome(None).is_ok());
    }
}
