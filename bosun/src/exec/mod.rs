//! Command execution against the host or the managed container.
//!
//! The session layer hands every execution a [`SessionIo`] bundle of
//! byte channels instead of wiring protocol streams in directly. The
//! executors only see channels, which keeps the completion semantics
//! (see [`relay::Race`]) independent of the remote-shell transport.

pub mod container;
pub mod host;
pub mod relay;

use tokio::sync::mpsc;

/// Terminal allocation carried by an interactive request.
#[derive(Clone, Debug)]
pub struct TtyRequest {
    pub term: String,
    pub width: u16,
    pub height: u16,
}

/// One terminal-size-change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u16,
    pub height: u16,
}

/// A single process invocation. Consumed exactly once.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// Argv to run; empty means "the user's login shell".
    pub command: Vec<String>,

    pub tty: Option<TtyRequest>,

    pub working_dir: String,
    pub user: String,
    pub env: Vec<(String, String)>,
}

impl ExecutionRequest {
    pub fn is_shell(&self) -> bool {
        self.command.is_empty()
    }
}

/// Stream endpoints for one execution.
///
/// `stdin` closing signals end-of-input; `resize` is only present for
/// terminal sessions.
pub struct SessionIo {
    pub stdin: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stdout: mpsc::UnboundedSender<Vec<u8>>,
    pub stderr: mpsc::UnboundedSender<Vec<u8>>,
    pub resize: Option<mpsc::UnboundedReceiver<WindowSize>>,
}

/// Sender halves paired with a [`SessionIo`], kept by the session layer.
pub struct SessionIoHandles {
    pub stdin: mpsc::UnboundedSender<Vec<u8>>,
    pub stdout: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stderr: mpsc::UnboundedReceiver<Vec<u8>>,
    pub resize: Option<mpsc::UnboundedSender<WindowSize>>,
}

/// Build a connected `SessionIo`/`SessionIoHandles` pair.
pub fn session_io(with_resize: bool) -> (SessionIo, SessionIoHandles) {
    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

    let (resize_tx, resize_rx) = if with_resize {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    (
        SessionIo {
            stdin: stdin_rx,
            stdout: stdout_tx,
            stderr: stderr_tx,
            resize: resize_rx,
        },
        SessionIoHandles {
            stdin: stdin_tx,
            stdout: stdout_rx,
            stderr: stderr_rx,
            resize: resize_tx,
        },
    )
}
