//! Connection Handler
//!
//! One handler per client, running on its own task:
//!
//! ```text
//!   read bytes ──> parse every complete frame ──> execute ──> queue reply
//!        ▲                                                        │
//!        └──────────────── flush once per batch ◄─────────────────┘
//! ```
//!
//! TCP is a stream, so a read may carry half a command or several pipelined
//! ones. Incoming bytes accumulate in a `BytesMut` until the parser reports a
//! complete frame. Replies for one batch are buffered and flushed together.
//!
//! The handler is generic over the stream so tests can drive it with an
//! in-memory mock instead of a socket.

use crate::commands::CommandHandler;
use crate::protocol::{parse_message, ParseError, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Default cap on buffered, unparsed input (1 GB). Must stay above
/// [`crate::protocol::MAX_BULK_SIZE`] so any legal frame fits.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Peer closed the socket between commands
    #[error("client disconnected")]
    ClientDisconnected,

    /// Peer closed the socket in the middle of a command
    #[error("unexpected end of stream with {buffered} bytes buffered")]
    UnexpectedEof { buffered: usize },

    #[error("query buffer limit of {limit} bytes exceeded")]
    BufferFull { limit: usize },
}

impl ConnectionError {
    /// True for the ways a client normally goes away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected => true,
            ConnectionError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Serves one client until it disconnects or misbehaves.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    addr: SocketAddr,
    buffer: BytesMut,
    commands: CommandHandler,
    max_buffer: usize,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, addr: SocketAddr, commands: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            max_buffer: MAX_BUFFER_SIZE,
        }
    }

    /// Overrides the cap on buffered input.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.max_buffer = limit;
        self
    }

    /// Runs the read/execute/respond loop to completion.
    ///
    /// A clean disconnect between commands returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        match self.serve().await {
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => Ok(()),
        }
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut replies = 0usize;
            while let Some(command) = self.next_frame().await? {
                let reply = self.commands.execute(command);
                self.stream.write_all(&reply.serialize()).await?;
                replies += 1;
            }

            if replies > 0 {
                self.stream.flush().await?;
                trace!(client = %self.addr, replies, "Flushed replies");
            }

            self.fill_buffer().await?;
        }
    }

    /// Pops the next complete frame off the buffer, if any.
    ///
    /// On a protocol error the client is told why before the connection is
    /// dropped.
    async fn next_frame(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        match parse_message(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(client = %self.addr, consumed, remaining = self.buffer.len(), "Parsed frame");
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error, closing connection");
                let reply = RespValue::error(format!("ERR Protocol error: {e}"));
                self.stream.write_all(&reply.serialize()).await?;
                self.stream.flush().await?;
                Err(e.into())
            }
        }
    }

    async fn fill_buffer(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.max_buffer {
            let e = ConnectionError::BufferFull {
                limit: self.max_buffer,
            };
            warn!(client = %self.addr, buffered = self.buffer.len(), "Query buffer full, closing connection");
            let reply = RespValue::error(format!("ERR Protocol error: {e}"));
            self.stream.write_all(&reply.serialize()).await?;
            self.stream.flush().await?;
            return Err(e);
        }
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof {
                    buffered: self.buffer.len(),
                }
            });
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] and logs how it ended.
pub async fn handle_connection<S>(stream: S, addr: SocketAddr, commands: CommandHandler)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match ConnectionHandler::new(stream, addr, commands).run().await {
        Ok(()) => {}
        Err(e) if e.is_disconnect() => debug!(client = %addr, "Connection reset by client"),
        Err(e) => info!(client = %addr, error = %e, "Connection closed with error"),
    }
}
