use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

/// Maximum number of pending connections in the listen backlog.
const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept, for instance when running out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Binding a listening socket failed.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {addr}")]
pub struct BindError {
    /// The requested address.
    pub addr: SocketAddr,
    /// The underlying socket error.
    #[source]
    pub source: io::Error,
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// A running accept loop on a listening socket.
///
/// Accepted connections are handed to a callback which is expected to spawn their handling.
/// Shutting the loop down closes the listening socket, connections that were accepted before keep
/// running until they finish.
pub(crate) struct AcceptLoop {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl AcceptLoop {
    /// Binds `addr` and spawns the accept loop onto the current runtime.
    pub fn bind<F>(addr: SocketAddr, mut on_accept: F) -> Result<Self, BindError>
    where
        F: FnMut(TcpStream, SocketAddr) + Send + 'static,
    {
        let (listener, local_addr) = listen(addr)
            .and_then(|listener| {
                let local_addr = listener.local_addr()?;
                Ok((listener, local_addr))
            })
            .map_err(|source| BindError { addr, source })?;

        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => on_accept(stream, peer),
                        Err(error) => {
                            graphite_log::warn!("failed to accept connection on {local_addr}: {error}");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    },
                }
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Returns the address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits until the listening socket is closed.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        // The loop may have exited already if it panicked.
        self.shutdown.send(()).ok();
        self.task.await
    }
}
