//! Bounded TCP accept.
//!
//! A connection slot is reserved before `accept(2)` is called, so once
//! `max_connections` sockets are open further clients queue in the kernel
//! backlog instead of consuming file descriptors in the process.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot listen: {0}")]
    Bind(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The slot semaphore was closed.
    #[error("listener closed")]
    Closed,
}

/// Listening socket plus the slot budget for open connections.
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

async fn resolve(bind_address: &str) -> io::Result<SocketAddr> {
    lookup_host(bind_address).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{bind_address}' did not resolve to an address"),
        )
    })
}

fn open_socket(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.set_nodelay(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr = resolve(&config.bind_address()).await.map_err(ListenerError::Bind)?;
        let socket = open_socket(addr, config.backlog).map_err(ListenerError::Bind)?;

        let local = socket.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %local,
            backlog = config.backlog,
            max_connections = config.max_connections,
            "Listening"
        );

        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Wait for a free slot, then for a client.
    ///
    /// The returned [`ConnectionPermit`] keeps the slot until it is dropped.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(peer_addr = %peer, free_slots = self.slots.available_permits(), "Accepted");
        Ok((stream, peer, ConnectionPermit { _slot: slot }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One occupied connection slot. Released on drop, including on panic unwind.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}
