//! Unix-socket forwarding for the private channel type.
//!
//! A companion client opens a `direct-streamlocal@openssh.com` channel
//! naming a local socket path to reach the agent's control socket
//! through the encrypted connection.

use crate::error::{AgentError, AgentResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::debug;

/// Dial the requested socket. Failure here rejects the channel before
/// it is ever accepted.
pub async fn dial(socket_path: &str) -> AgentResult<UnixStream> {
    UnixStream::connect(socket_path).await.map_err(|e| {
        AgentError::Transport(format!("dialing unix socket \"{}\": {}", socket_path, e))
    })
}

/// Relay bytes in both directions until either side closes.
///
/// Both endpoints are dropped as soon as one direction finishes, which
/// unblocks the other direction instead of leaving it half-open.
pub async fn relay<C, S>(channel: C, socket: S)
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut channel_read, mut channel_write) = tokio::io::split(channel);
    let (mut socket_read, mut socket_write) = tokio::io::split(socket);

    tokio::select! {
        outcome = tokio::io::copy(&mut channel_read, &mut socket_write) => {
            debug!(?outcome, "tunnel channel-to-socket direction finished");
        }
        outcome = tokio::io::copy(&mut socket_read, &mut channel_write) => {
            debug!(?outcome, "tunnel socket-to-channel direction finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_failure_is_transport_error() {
        let err = dial("/nonexistent/bosun/control.sock").await.unwrap_err();

        assert!(matches!(err, AgentError::Transport(_)));
    }

    #[tokio::test]
    async fn test_relay_moves_bytes_both_ways_and_ends_on_close() {
        let (channel_near, channel_far) = tokio::io::duplex(1024);
        let (socket_near, socket_far) = tokio::io::duplex(1024);

        let relay_task = tokio::spawn(relay(channel_far, socket_far));

        let (mut channel_read, mut channel_write) = tokio::io::split(channel_near);
        let (mut socket_read, mut socket_write) = tokio::io::split(socket_near);

        channel_write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        socket_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        socket_write.write_all(b"pong").await.unwrap();
        channel_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the client side of the channel ends the relay.
        drop(channel_write);
        drop(channel_read);
        relay_task.await.unwrap();
    }
}
