use std::error::Error;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use graphite_statsd::metric;

use crate::config::ServerConfig;
use crate::interfaces::{InterfaceProvider, NetworkInterface};
use crate::listener::{CarbonListener, HttpRequestListener, HttpRequestListeners, RenderListener};
use crate::render::InvalidListenerPath;
use crate::server::{Server, ServerError};
use crate::statsd::{ServerCounters, ServerGauges};

/// Pause between two attempts to start the same server.
const BINDING_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// An error returned by the [`Manager`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// No server is running.
    #[error("Manager is not running")]
    NotRunning,

    /// The interface provider failed.
    #[error("failed to enumerate network interfaces")]
    Interfaces(#[source] io::Error),

    /// A server did not start within the configured number of attempts.
    #[error("failed to start server on {host}")]
    Bind {
        /// The host the server tried to bind.
        host: IpAddr,
        /// The error of the last attempt.
        #[source]
        source: ServerError,
    },

    /// At least one server failed to stop.
    #[error("failed to stop servers")]
    Stop(#[source] ServerError),
}

/// Runs one [`Server`] on the wildcard host or one per network interface.
///
/// Listeners registered on the manager are handed to every server it runs, including servers
/// started later.
pub struct Manager {
    config: ServerConfig,
    interfaces: Arc<dyn InterfaceProvider>,
    carbon_listener: Option<Arc<dyn CarbonListener>>,
    render_listener: Option<Arc<dyn RenderListener>>,
    http_listeners: HttpRequestListeners,
    servers: Vec<Server>,
    each_interface: bool,
}

impl Manager {
    /// Creates a manager without running servers.
    pub fn new(config: ServerConfig, interfaces: Arc<dyn InterfaceProvider>) -> Self {
        Self {
            config,
            interfaces,
            carbon_listener: None,
            render_listener: None,
            http_listeners: HttpRequestListeners::new(),
            servers: Vec::new(),
            each_interface: false,
        }
    }

    /// Returns the configuration servers are created with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the running servers in start order.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Returns `true` while at least one server runs.
    pub fn is_running(&self) -> bool {
        !self.servers.is_empty()
    }

    /// Registers the Carbon listener on the running and all future servers.
    pub fn set_carbon_listener(&mut self, listener: Arc<dyn CarbonListener>) {
        for server in &self.servers {
            server.set_carbon_listener(listener.clone());
        }
        self.carbon_listener = Some(listener);
    }

    /// Registers the Render listener on the running and all future servers.
    pub fn set_render_listener(&mut self, listener: Arc<dyn RenderListener>) {
        for server in &self.servers {
            server.set_render_listener(listener.clone());
        }
        self.render_listener = Some(listener);
    }

    /// Registers an additional Render listener for `path` on every server.
    pub fn set_http_request_listener(
        &mut self,
        path: &str,
        listener: Arc<dyn HttpRequestListener>,
    ) -> Result<(), InvalidListenerPath> {
        if path.is_empty() {
            return Err(InvalidListenerPath(path.to_owned()));
        }

        for server in &self.servers {
            server.set_http_request_listener(path, listener.clone())?;
        }
        self.http_listeners.insert(path.to_owned(), listener);
        Ok(())
    }

    /// Starts the servers.
    ///
    /// Running servers are stopped first. With interface binding, one server is started per
    /// interface in enumeration order. Each start is attempted `binding_retry_count + 1` times.
    /// If any server fails to start, all servers started by this call are stopped again.
    pub async fn start(&mut self) -> Result<(), ManagerError> {
        self.stop().await?;

        let interfaces = self
            .interfaces
            .interfaces()
            .map_err(ManagerError::Interfaces)?;

        let each_interface = if self.config.auto_interface_binding {
            interfaces.len() > 1
        } else {
            self.config.each_interface_binding
        };
        self.each_interface = each_interface && !interfaces.is_empty();

        let result = if self.each_interface {
            self.start_each(interfaces).await
        } else {
            let server = Server::new(&self.config, self.config.host);
            self.start_server(server).await
        };

        if let Err(error) = result {
            if let Err(stop_error) = self.stop().await {
                graphite_log::error!(
                    error = &stop_error as &dyn Error,
                    "failed to roll back servers"
                );
            }
            return Err(error);
        }

        metric!(gauge(ServerGauges::RunningServers) = self.servers.len() as u64);
        Ok(())
    }

    async fn start_each(&mut self, interfaces: Vec<NetworkInterface>) -> Result<(), ManagerError> {
        for interface in interfaces {
            let server = Server::with_interface(&self.config, interface);
            self.start_server(server).await?;
        }
        Ok(())
    }

    async fn start_server(&mut self, mut server: Server) -> Result<(), ManagerError> {
        if let Some(ref listener) = self.carbon_listener {
            server.set_carbon_listener(listener.clone());
        }
        if let Some(ref listener) = self.render_listener {
            server.set_render_listener(listener.clone());
        }
        for (path, listener) in &self.http_listeners {
            server
                .set_http_request_listener(path, listener.clone())
                .ok();
        }

        let host = server.host();
        let mut attempt = 0;
        loop {
            attempt += 1;
            metric!(counter(ServerCounters::ServerStartAttempt) += 1);

            let error = match server.start().await {
                Ok(()) => break,
                Err(error) => error,
            };

            metric!(counter(ServerCounters::ServerStartFailed) += 1);
            if attempt > self.config.binding_retry_count {
                return Err(ManagerError::Bind {
                    host,
                    source: error,
                });
            }

            graphite_log::warn!(
                error = &error as &dyn Error,
                attempt,
                "failed to start server on {host}, retrying"
            );
            tokio::time::sleep(BINDING_RETRY_INTERVAL).await;
        }

        match server.interface() {
            Some(interface) => graphite_log::info!("server running on {}", interface.name),
            None => graphite_log::info!("server running on {host}"),
        }

        self.servers.push(server);
        Ok(())
    }

    /// Stops all servers and forgets them, returning the last error.
    pub async fn stop(&mut self) -> Result<(), ManagerError> {
        let mut result = Ok(());
        for mut server in self.servers.drain(..) {
            if let Err(error) = server.stop().await {
                result = Err(ManagerError::Stop(error));
            }
        }

        metric!(gauge(ServerGauges::RunningServers) = 0u64);
        result
    }

    /// Returns the addresses clients can reach the servers on.
    ///
    /// With interface binding, these are the addresses of the bound interfaces. Otherwise the
    /// server listens on the wildcard host and all local addresses are returned.
    pub fn bound_addresses(&self) -> Result<Vec<IpAddr>, ManagerError> {
        if !self.is_running() {
            return Err(ManagerError::NotRunning);
        }

        if self.each_interface {
            return Ok(self.servers.iter().map(Server::host).collect());
        }

        Ok(self.interfaces.addresses().unwrap_or_default())
    }

    /// Returns the interfaces clients can reach the servers on.
    pub fn bound_interfaces(&self) -> Result<Vec<NetworkInterface>, ManagerError> {
        if !self.is_running() {
            return Err(ManagerError::NotRunning);
        }

        if self.each_interface {
            return Ok(self
                .servers
                .iter()
                .filter_map(|server| server.interface().cloned())
                .collect());
        }

        Ok(self.interfaces.interfaces().unwrap_or_default())
    }

    /// Returns the first bound address.
    pub fn bound_address(&self) -> Result<IpAddr, ManagerError> {
        self.bound_addresses()?
            .into_iter()
            .next()
            .ok_or(ManagerError::NotRunning)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("servers", &self.servers)
            .finish()
    }
}
