use std::io;
use std::net::IpAddr;

/// A local network interface and the address servers bind on it.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NetworkInterface {
    /// The operating system name of the interface, for example `eth0`.
    pub name: String,
    /// The first IPv4 address of the interface.
    pub addr: IpAddr,
}

impl NetworkInterface {
    /// Creates an interface entry.
    pub fn new(name: impl Into<String>, addr: IpAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }
}

/// Enumerates the interfaces the [`Manager`](crate::Manager) may bind.
pub trait InterfaceProvider: Send + Sync {
    /// Returns the usable interfaces in enumeration order.
    fn interfaces(&self) -> io::Result<Vec<NetworkInterface>>;

    /// Returns the addresses of all usable interfaces.
    fn addresses(&self) -> io::Result<Vec<IpAddr>> {
        Ok(self
            .interfaces()?
            .into_iter()
            .map(|interface| interface.addr)
            .collect())
    }
}

/// The IPv4 interfaces of this host, excluding loopback.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalInterfaces;

impl InterfaceProvider for LocalInterfaces {
    fn interfaces(&self) -> io::Result<Vec<NetworkInterface>> {
        let addresses = local_ip_address::list_afinet_netifas().map_err(io::Error::other)?;

        let mut interfaces: Vec<NetworkInterface> = Vec::new();
        for (name, addr) in addresses {
            if !addr.is_ipv4() || addr.is_loopback() {
                continue;
            }
            if interfaces.iter().any(|interface| interface.name == name) {
                continue;
            }
            interfaces.push(NetworkInterface::new(name, addr));
        }

        Ok(interfaces)
    }
}

impl InterfaceProvider for Vec<NetworkInterface> {
    fn interfaces(&self) -> io::Result<Vec<NetworkInterface>> {
        Ok(self.clone())
    }
}
