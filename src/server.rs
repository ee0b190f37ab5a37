//! TCP server: listeners, accept loops and graceful shutdown.
//!
//! Each configured service port gets its own listener and accept task.
//! Accepted streams are split and handed to the port, which registers the
//! connection and starts its I/O tasks.

use crate::config::Config;
use crate::context::ServerContext;
use crate::dispatch::SCHEDULER_MIN_TICKS;
use crate::error::ServerError;
use crate::runtime::{ProtocolRegistry, ServicePort};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for connections to finish closing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    context: Arc<ServerContext>,
    ports: Vec<Arc<ServicePort>>,
}

impl Server {
    /// Create a server, resolving each configured protocol through `registry`.
    pub fn new(config: Config, registry: &ProtocolRegistry) -> Result<Self, ServerError> {
        let mut ports = Vec::with_capacity(config.services.len());
        for entry in &config.services {
            let mut port = ServicePort::new(entry.addr);
            for name in &entry.protocols {
                port.add_service(registry.get(name)?)?;
            }
            ports.push(Arc::new(port));
        }

        Ok(Server {
            context: ServerContext::new(config.network_settings()),
            ports,
        })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn ports(&self) -> &[Arc<ServicePort>] {
        &self.ports
    }

    /// Bind a listener for every port. Must be called inside a tokio runtime.
    pub fn bind(&self) -> Result<Vec<(Arc<ServicePort>, TcpListener)>, ServerError> {
        self.ports
            .iter()
            .map(|port| -> Result<_, ServerError> {
                let listener = TcpListener::from_std(create_listener(port.addr())?)?;
                Ok((Arc::clone(port), listener))
            })
            .collect()
    }

    /// Bind, serve until Ctrl-C, then shut down gracefully.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listeners = self.bind()?;
        self.serve(listeners, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await
    }

    /// Accept on `listeners` until `signal` resolves.
    pub async fn serve<F>(
        &self,
        listeners: Vec<(Arc<ServicePort>, TcpListener)>,
        signal: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.context.start()?;

        let (stop_tx, _) = watch::channel(false);
        let mut tasks = Vec::with_capacity(listeners.len());
        for (port, listener) in listeners {
            let services: Vec<_> = port.services().iter().map(|s| s.protocol_name()).collect();
            info!(
                address = %listener.local_addr()?,
                services = ?services,
                "Server listening"
            );
            tasks.push(tokio::spawn(accept_loop(
                listener,
                port,
                Arc::clone(&self.context),
                stop_tx.subscribe(),
            )));
        }

        signal.await;
        info!("Shutdown requested");
        stop_tx.send_replace(true);
        for task in tasks {
            if task.await.is_err() {
                error!("Accept task panicked");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Close every connection, wait for them to drain, then stop the context.
    pub async fn shutdown(&self) {
        let connections = self.context.connections();
        info!(count = connections.len(), "Closing connections");
        connections.close_all();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !connections.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(SCHEDULER_MIN_TICKS)).await;
        }
        if !connections.is_empty() {
            warn!(remaining = connections.len(), "Connections still open at shutdown");
        }

        self.context.stop();
        let context = Arc::clone(&self.context);
        if tokio::task::spawn_blocking(move || context.shutdown())
            .await
            .is_err()
        {
            error!("Context shutdown panicked");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    port: Arc<ServicePort>,
    context: Arc<ServerContext>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                let (reader, writer) = stream.into_split();
                port.accept(&context, Box::new(reader), Box::new(writer), Some(peer));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
    debug!(address = %port.addr(), "Accept loop stopped");
}

/// Create a non-blocking TCP listener with address reuse.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
