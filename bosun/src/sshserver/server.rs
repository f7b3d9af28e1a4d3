//! The remote-shell server: connection handling, channel state, and
//! the private socket-forwarding channel type.

use super::auth::SystemAuth;
use super::session::{run_session, split_command_line, SessionContext};
use super::tunnel;
use crate::config::AgentConfig;
use crate::engine::DockerEngine;
use crate::env::ContainerLifecycle;
use crate::error::{AgentError, AgentResult};
use crate::exec::container::ContainerExecutor;
use crate::exec::{session_io, TtyRequest, WindowSize};
use russh::server::{Auth, Handle, Handler, Msg, Server, Session};
use russh::{Channel, ChannelId, CryptoVec};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct ShellServer {
    config: AgentConfig,
    auth: Arc<SystemAuth>,
    context: Arc<SessionContext>,
}

impl ShellServer {
    pub fn new(config: AgentConfig, auth: SystemAuth, engine: DockerEngine) -> Self {
        let context = SessionContext {
            config: config.clone(),
            executor: ContainerExecutor::new(
                engine.docker().clone(),
                config.container_name.clone(),
            ),
            lifecycle: ContainerLifecycle::new(Arc::new(engine), config.clone()),
        };

        Self {
            config,
            auth: Arc::new(auth),
            context: Arc::new(context),
        }
    }

    pub async fn listen(self) -> AgentResult<()> {
        let host_key = self.auth.host_key()?;

        let server_config = Arc::new(russh::server::Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_secs(1),
            ..Default::default()
        });

        info!(
            addr = %self.config.ssh_listen_addr,
            port = self.config.ssh_listen_port,
            "remote-shell server listening"
        );

        let mut listener = Listener {
            auth: self.auth,
            context: self.context,
        };
        listener
            .run_on_address(
                server_config,
                (self.config.ssh_listen_addr.as_str(), self.config.ssh_listen_port),
            )
            .await?;

        Ok(())
    }
}

struct Listener {
    auth: Arc<SystemAuth>,
    context: Arc<SessionContext>,
}

impl Server for Listener {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, _peer_addr: Option<SocketAddr>) -> ConnectionHandler {
        ConnectionHandler {
            auth: self.auth.clone(),
            context: self.context.clone(),
            channels: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct ChannelState {
    pty: Option<TtyRequest>,
    stdin: Option<mpsc::UnboundedSender<Vec<u8>>>,
    resize: Option<mpsc::UnboundedSender<WindowSize>>,
    dispatched: bool,
}

pub struct ConnectionHandler {
    auth: Arc<SystemAuth>,
    context: Arc<SessionContext>,
    channels: HashMap<ChannelId, ChannelState>,
}

impl ConnectionHandler {
    /// Start the channel's one execution. Later shell/exec requests on
    /// the same channel are ignored.
    fn dispatch(&mut self, channel_id: ChannelId, command: Vec<String>, session: &mut Session) {
        let Some(state) = self.channels.get_mut(&channel_id) else {
            return;
        };
        if state.dispatched {
            warn!("duplicate shell/exec request on channel; ignoring");
            return;
        }
        state.dispatched = true;

        let (io, handles) = session_io(state.pty.is_some());
        state.stdin = Some(handles.stdin);
        state.resize = handles.resize;

        let pty = state.pty.clone();
        let context = self.context.clone();
        let handle = session.handle();
        let stdout = handles.stdout;
        let stderr = handles.stderr;

        tokio::spawn(drive_session(
            context, channel_id, command, pty, io, handle, stdout, stderr,
        ));
    }
}

/// Run one execution and forward its output, then report the session's
/// exit status: 0 on success, 1 on any error.
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    context: Arc<SessionContext>,
    channel_id: ChannelId,
    command: Vec<String>,
    pty: Option<TtyRequest>,
    io: crate::exec::SessionIo,
    handle: Handle,
    mut stdout: mpsc::UnboundedReceiver<Vec<u8>>,
    mut stderr: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let run = run_session(&context, command, pty, io);
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(chunk) = stdout.recv() => {
                let _ = handle.data(channel_id, CryptoVec::from(chunk)).await;
            }
            Some(chunk) = stderr.recv() => {
                let _ = handle.extended_data(channel_id, 1, CryptoVec::from(chunk)).await;
            }
        }
    };

    // Flush output that raced with completion.
    while let Ok(chunk) = stdout.try_recv() {
        let _ = handle.data(channel_id, CryptoVec::from(chunk)).await;
    }
    while let Ok(chunk) = stderr.try_recv() {
        let _ = handle.extended_data(channel_id, 1, CryptoVec::from(chunk)).await;
    }

    let status = match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "session failed");
            1
        }
    };

    let _ = handle.exit_status_request(channel_id, status).await;
    let _ = handle.eof(channel_id).await;
    let _ = handle.close(channel_id).await;
}

impl Handler for ConnectionHandler {
    type Error = AgentError;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self.auth.check_public_key(user, public_key) {
            Ok(()) => Ok(Auth::Accept),
            Err(e @ AgentError::AuthRejected(_)) => {
                info!(reason = %e, "authentication rejected");
                Ok(Auth::reject())
            }
            Err(e) => {
                error!(error = %e, user, "public-key check failed");
                Ok(Auth::reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.pty = Some(TtyRequest {
                term: term.to_string(),
                width: col_width as u16,
                height: row_height as u16,
            });
        }
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            if let Some(resize) = &state.resize {
                let _ = resize.send(WindowSize {
                    width: col_width as u16,
                    height: row_height as u16,
                });
            }
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.dispatch(channel, Vec::new(), session);
        session.channel_success(channel)?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let line = String::from_utf8_lossy(data);
        let command = split_command_line(&line);

        self.dispatch(channel, command, session);
        session.channel_success(channel)?;
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            if let Some(stdin) = &state.stdin {
                let _ = stdin.send(data.to_vec());
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the sender is the executor's end-of-input signal.
        if let Some(state) = self.channels.get_mut(&channel) {
            state.stdin = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match tunnel::dial(socket_path).await {
            Ok(socket) => {
                info!(socket_path, "tunnel channel opened");
                tokio::spawn(tunnel::relay(channel.into_stream(), socket));
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, socket_path, "rejecting tunnel channel");
                Ok(false)
            }
        }
    }
}
