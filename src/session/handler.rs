//! Per-connection session loop.
//!
//! Each accepted socket gets one task running [`serve`], a loop of
//! read-frame then dispatch then write-reply. Commands on a single
//! connection are strictly sequential; fairness across connections comes
//! from the runtime scheduling one task per client.
//!
//! How a session ends decides how it is logged and whether a reply is
//! sent. A clean EOF or a QUIT is a normal disconnect. A protocol
//! violation closes the socket without a reply. I/O errors are logged and
//! the connection dropped.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::command::Dispatcher;
use crate::protocol::{read_command, DecodeError};

/// Counters shared by every session, read directly by whoever holds them.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Error)]
enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(DecodeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct Session {
    stream: BufStream<TcpStream>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ConnectionStats>,
    write_buf: Vec<u8>,
}

impl Session {
    async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            let command = match read_command(&mut self.stream).await {
                Ok(Some(command)) => command,
                // Clean EOF between frames: the client simply went away.
                Ok(None) => return Ok(()),
                Err(DecodeError::Io(e)) => return Err(SessionError::Io(e)),
                Err(e) => return Err(SessionError::Protocol(e)),
            };

            let outcome = self.dispatcher.execute(&command);
            self.stats.command_processed();

            self.write_buf.clear();
            outcome.reply.write_to(&mut self.write_buf);
            self.stream.write_all(&self.write_buf).await?;
            self.stream.flush().await?;

            if outcome.close {
                return Ok(());
            }
        }
    }
}

/// Serves one client connection to completion.
///
/// Runs until the client disconnects, sends QUIT, breaks the protocol, or
/// the connection fails. The reply to each command is flushed before the
/// next frame is read.
pub async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ConnectionStats>,
) {
    stats.connection_opened();
    info!(client = %addr, "Client connected");

    let _ = stream.set_nodelay(true);
    let mut session = Session {
        stream: BufStream::new(stream),
        dispatcher,
        stats: Arc::clone(&stats),
        write_buf: Vec::new(),
    };

    match session.run().await {
        Ok(()) => info!(client = %addr, "Client disconnected"),
        Err(SessionError::Protocol(e)) => {
            warn!(client = %addr, error = %e, "Closing connection after protocol violation");
        }
        Err(SessionError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "Connection reset by peer");
        }
        Err(SessionError::Io(e)) => {
            warn!(client = %addr, error = %e, "Connection error");
        }
    }

    stats.connection_closed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(Store::new())));
        let stats = Arc::new(ConnectionStats::new());

        let accept_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            loop {
                let (stream, peer) = listener.accept().await.unwrap();
                tokio::spawn(serve(
                    stream,
                    peer,
                    Arc::clone(&dispatcher),
                    Arc::clone(&accept_stats),
                ));
            }
        });

        (addr, stats)
    }

    async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_roundtrip() {
        let (addr, _stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (addr, _stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nember\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 11).await, b"$5\r\nember\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n",
            )
            .await
            .unwrap();

        let replies = read_exactly(&mut client, 18).await;
        assert_eq!(replies, b"+OK\r\n+OK\r\n$2\r\nv1\r\n");
    }

    #[tokio::test]
    async fn test_quit_flushes_reply_then_closes() {
        let (addr, _stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        let mut rest = [0u8; 16];
        assert_eq!(client.read(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_protocol_violation_closes_without_reply() {
        let (addr, _stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b":5\r\n").await.unwrap();

        // The server must drop the connection silently; depending on how
        // much it consumed first, the close surfaces as EOF or a reset.
        let mut buf = [0u8; 16];
        match client.read(&mut buf).await {
            Ok(0) => {}
            Ok(n) => panic!("unexpected reply: {:?}", &buf[..n]),
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server().await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        first.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        second.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exactly(&mut first, 7).await;
        read_exactly(&mut second, 7).await;

        drop(second);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
    }
}
