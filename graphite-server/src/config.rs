use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default port of the Carbon plaintext protocol.
pub const DEFAULT_CARBON_PORT: u16 = 2003;

/// Default port of the Render HTTP API.
pub const DEFAULT_RENDER_PORT: u16 = 8080;

/// Settings shared by the Carbon and Render engines of a [`Server`](crate::Server) and the
/// [`Manager`](crate::Manager) that owns them.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// The address to bind when not binding per interface.
    pub host: IpAddr,
    /// Port of the Carbon engine. `0` picks a free port.
    pub carbon_port: u16,
    /// Port of the Render engine. `0` picks a free port.
    pub render_port: u16,
    /// Idle time after which a connection is closed. Zero disables the limit.
    pub connection_timeout: Duration,
    /// Silence on a Carbon connection after which buffered lines are parsed.
    pub connection_wait_timeout: Duration,
    /// Bind one server per network interface.
    pub each_interface_binding: bool,
    /// Bind per interface only if more than one interface is available.
    pub auto_interface_binding: bool,
    /// Additional attempts for a server that fails to start.
    pub binding_retry_count: u32,
}

impl ServerConfig {
    /// Returns the socket address of the Carbon engine on `host`.
    pub fn carbon_addr(&self, host: IpAddr) -> SocketAddr {
        SocketAddr::new(host, self.carbon_port)
    }

    /// Returns the socket address of the Render engine on `host`.
    pub fn render_addr(&self, host: IpAddr) -> SocketAddr {
        SocketAddr::new(host, self.render_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            carbon_port: DEFAULT_CARBON_PORT,
            render_port: DEFAULT_RENDER_PORT,
            connection_timeout: Duration::from_secs(60),
            connection_wait_timeout: Duration::from_millis(1000),
            each_interface_binding: true,
            auto_interface_binding: true,
            binding_retry_count: 0,
        }
    }
}
