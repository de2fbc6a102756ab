use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::task::JoinError;

use crate::carbon::CarbonEngine;
use crate::config::ServerConfig;
use crate::interfaces::NetworkInterface;
use crate::listener::{CarbonListener, HttpRequestListener, RenderListener};
use crate::net::BindError;
use crate::render::{InvalidListenerPath, RenderEngine};

/// An error starting or stopping a [`Server`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// One of the engines could not bind its socket.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The accept loop of an engine panicked while shutting down.
    #[error("failed to stop accepting connections")]
    Shutdown(#[from] JoinError),
}

/// A Carbon engine and a Render engine bound to the same host.
#[derive(Debug)]
pub struct Server {
    host: IpAddr,
    interface: Option<NetworkInterface>,
    carbon: CarbonEngine,
    render: RenderEngine,
}

impl Server {
    /// Creates a stopped server on `host` with the ports and timeouts of `config`.
    pub fn new(config: &ServerConfig, host: IpAddr) -> Self {
        Self {
            host,
            interface: None,
            carbon: CarbonEngine::new(
                config.carbon_addr(host),
                config.connection_wait_timeout,
                config.connection_timeout,
            ),
            render: RenderEngine::new(config.render_addr(host), config.connection_timeout),
        }
    }

    /// Creates a stopped server bound to the address of `interface`.
    pub fn with_interface(config: &ServerConfig, interface: NetworkInterface) -> Self {
        let mut server = Self::new(config, interface.addr);
        server.interface = Some(interface);
        server
    }

    /// Returns the host both engines bind.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Returns the interface this server was created for.
    pub fn interface(&self) -> Option<&NetworkInterface> {
        self.interface.as_ref()
    }

    /// Returns the Carbon engine.
    pub fn carbon(&self) -> &CarbonEngine {
        &self.carbon
    }

    /// Returns the Render engine.
    pub fn render(&self) -> &RenderEngine {
        &self.render
    }

    /// Returns the bound Carbon address while running.
    pub fn carbon_addr(&self) -> Option<SocketAddr> {
        self.carbon.local_addr()
    }

    /// Returns the bound Render address while running.
    pub fn render_addr(&self) -> Option<SocketAddr> {
        self.render.local_addr()
    }

    /// Returns `true` if both engines accept connections.
    pub fn is_running(&self) -> bool {
        self.carbon.is_running() && self.render.is_running()
    }

    /// Registers the listener receiving ingested series.
    pub fn set_carbon_listener(&self, listener: Arc<dyn CarbonListener>) {
        self.carbon.set_listener(listener);
    }

    /// Registers the listener resolving Render queries.
    pub fn set_render_listener(&self, listener: Arc<dyn RenderListener>) {
        self.render.set_listener(listener);
    }

    /// See [`RenderEngine::set_http_request_listener`].
    pub fn set_http_request_listener(
        &self,
        path: &str,
        listener: Arc<dyn HttpRequestListener>,
    ) -> Result<(), InvalidListenerPath> {
        self.render.set_http_request_listener(path, listener)
    }

    /// See [`RenderEngine::set_http_request_listeners`].
    pub fn set_http_request_listeners<'a, I>(&self, listeners: I) -> Result<(), InvalidListenerPath>
    where
        I: IntoIterator<Item = (&'a str, Arc<dyn HttpRequestListener>)>,
    {
        self.render.set_http_request_listeners(listeners)
    }

    /// Starts Carbon, then Render.
    ///
    /// If either engine fails to bind, the server is stopped again before the error is returned.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if let Err(error) = self.carbon.start().await {
            self.stop().await.ok();
            return Err(error.into());
        }

        if let Err(error) = self.render.start().await {
            self.stop().await.ok();
            return Err(error.into());
        }

        Ok(())
    }

    /// Stops both engines, returning the last error.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let carbon = self.carbon.stop().await;
        let render = self.render.stop().await;
        carbon.and(render).map_err(ServerError::from)
    }
}
