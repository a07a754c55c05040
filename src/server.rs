//! TCP Accept Loop
//!
//! Binds the listener and spawns one connection task per client until the
//! shutdown future resolves. Connection tasks already running are left to
//! finish on their own.

use crate::commands::CommandHandler;
use crate::connection::handle_connection;
use crate::storage::StorageEngine;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info, trace};

/// A bound listener plus the command handler shared by every connection.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    commands: CommandHandler,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, storage: Arc<StorageEngine>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            commands: CommandHandler::new(storage),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!(client = %addr, error = %e, "Could not set TCP_NODELAY");
                    }
                    tokio::spawn(handle_connection(stream, addr, self.commands.clone()));
                }
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }

        info!("Stopped accepting connections");
    }
}
