//! Host-side execution through the privilege-switch wrapper.
//!
//! Commands run as the platform user via `sudo`; the interactive
//! terminal form goes through `login -f` on a pseudo-terminal so the
//! user gets a real login session.

use super::{ExecutionRequest, SessionIo, WindowSize};
use crate::error::{AgentError, AgentResult};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

/// `sudo --set-home --login --user <user> [command...]`. With no
/// command, sudo runs the user's login shell.
pub fn privileged_argv(user: &str, command: &[String]) -> Vec<String> {
    let mut argv = vec![
        "sudo".to_string(),
        "--set-home".to_string(),
        "--login".to_string(),
        "--user".to_string(),
        user.to_string(),
    ];
    argv.extend(command.iter().cloned());
    argv
}

/// `sudo login -f <user>`: a full login session on the PTY.
pub fn login_shell_argv(user: &str) -> Vec<String> {
    vec![
        "sudo".to_string(),
        "login".to_string(),
        "-f".to_string(),
        user.to_string(),
    ]
}

pub async fn run_on_host(request: ExecutionRequest, io: SessionIo) -> AgentResult<()> {
    match &request.tty {
        Some(tty) => {
            let argv = if request.is_shell() {
                login_shell_argv(&request.user)
            } else {
                privileged_argv(&request.user, &request.command)
            };

            let mut env = request.env.clone();
            env.push(("TERM".to_string(), tty.term.clone()));

            run_pty(argv, env, tty.width, tty.height, io).await
        }
        None => {
            let argv = privileged_argv(&request.user, &request.command);
            run_piped(argv, request.env.clone(), io).await
        }
    }
}

/// Spawn with piped standard streams and wait for exit.
///
/// The process exit, not end-of-input, decides completion: the stdin
/// relay is abandoned once the process is gone.
pub(crate) async fn run_piped(
    argv: Vec<String>,
    env: Vec<(String, String)>,
    io: SessionIo,
) -> AgentResult<()> {
    let SessionIo {
        mut stdin,
        stdout,
        stderr,
        ..
    } = io;

    debug!(?argv, "spawning host process");

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut child_stdin = child.stdin.take();
    tokio::spawn(async move {
        while let Some(chunk) = stdin.recv().await {
            let Some(pipe) = child_stdin.as_mut() else { break };
            if pipe.write_all(&chunk).await.is_err() {
                break;
            }
        }
        // Dropping the pipe closes the child's stdin.
        drop(child_stdin.take());
    });

    let stdout_relay = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(pump_reader(pipe, stdout)));
    let stderr_relay = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(pump_reader(pipe, stderr)));

    let status = child.wait().await?;

    // Let the output relays drain what the process wrote before exit.
    if let Some(relay) = stdout_relay {
        let _ = relay.await;
    }
    if let Some(relay) = stderr_relay {
        let _ = relay.await;
    }

    exit_outcome(status.code())
}

/// Spawn on a pseudo-terminal, relay bytes both ways, apply window
/// changes, and wait for exit.
async fn run_pty(
    argv: Vec<String>,
    env: Vec<(String, String)>,
    width: u16,
    height: u16,
    io: SessionIo,
) -> AgentResult<()> {
    use nix::pty::{openpty, OpenptyResult, Winsize};

    let SessionIo {
        mut stdin,
        stdout,
        resize,
        ..
    } = io;

    debug!(?argv, "spawning host process on pty");

    let winsize = Winsize {
        ws_row: height,
        ws_col: width,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let OpenptyResult { master, slave } = openpty(Some(&winsize), None)
        .map_err(|e| AgentError::Internal(format!("openpty failed: {}", e)))?;

    let slave_raw = slave.as_raw_fd();
    let slave_stdin = dup_fd(slave.as_raw_fd())?;
    let slave_stdout = dup_fd(slave.as_raw_fd())?;
    let slave_stderr = dup_fd(slave.as_raw_fd())?;

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]).envs(env);
    cmd.stdin(Stdio::from(slave_stdin));
    cmd.stdout(Stdio::from(slave_stdout));
    cmd.stderr(Stdio::from(slave_stderr));

    // New session with the pty slave as controlling terminal.
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setsid().map_err(std::io::Error::other)?;
            if libc::ioctl(slave_raw, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    drop(slave);

    let mut master_write = master_file(&master)?;
    tokio::spawn(async move {
        while let Some(chunk) = stdin.recv().await {
            if master_write.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let master_read = master_file(&master)?;
    let output_relay = tokio::spawn(pump_reader(master_read, stdout));

    if let Some(resize) = resize {
        let resize_fd = dup_fd(master.as_raw_fd())?;
        tokio::spawn(apply_window_changes(resize, resize_fd));
    }

    let status = child.wait().await?;

    // Reads on the master error out once the child is gone; the relay
    // treats that like EOF.
    let _ = output_relay.await;
    drop(master);

    exit_outcome(status.code())
}

/// Mirror window-change events into the pty via `TIOCSWINSZ`.
async fn apply_window_changes(mut resize: mpsc::UnboundedReceiver<WindowSize>, fd: OwnedFd) {
    while let Some(size) = resize.recv().await {
        let winsize = libc::winsize {
            ws_row: size.height,
            ws_col: size.width,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };
        if rc == -1 {
            debug!("pty resize ioctl failed; stopping resize relay");
            break;
        }
    }
}

async fn pump_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) -> AgentResult<()>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            // EOF, or the hangup a pty master reports after child exit.
            Ok(0) | Err(_) => return Ok(()),
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    return Ok(());
                }
            }
        }
    }
}

fn dup_fd(fd: std::os::fd::RawFd) -> AgentResult<OwnedFd> {
    let duped = nix::unistd::dup(fd)
        .map_err(|e| AgentError::Internal(format!("fd dup failed: {}", e)))?;
    Ok(unsafe { OwnedFd::from_raw_fd(duped) })
}

fn master_file(master: &OwnedFd) -> AgentResult<tokio::fs::File> {
    let fd = dup_fd(master.as_raw_fd())?;
    Ok(tokio::fs::File::from_std(std::fs::File::from(fd)))
}

fn exit_outcome(code: Option<i32>) -> AgentResult<()> {
    match code {
        Some(0) => Ok(()),
        Some(code) => Err(AgentError::CommandFailed {
            exit_code: code as i64,
        }),
        // Killed by signal.
        None => Err(AgentError::CommandFailed { exit_code: -1 }),
    }
}
