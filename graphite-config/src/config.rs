use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use graphite_server::ServerConfig;
use graphite_store::StoreConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: None,
        }
    }

    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: Some(Box::new(error)),
        }
    }

    #[inline]
    fn field(field: &'static str) -> Self {
        Self {
            source: ConfigErrorSource::FieldOverride(field.to_owned()),
            kind: ConfigErrorKind::InvalidValue,
            error: None,
        }
    }

    #[inline]
    fn for_field<E>(error: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::FieldOverride(field.to_owned()),
            kind: ConfigErrorKind::InvalidValue,
            error: Some(Box::new(error)),
        }
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut f = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Overrides for config values that are passed on the command line.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The address the servers bind to.
    pub host: Option<String>,
    /// The port of the Carbon ingestion server.
    pub carbon_port: Option<String>,
    /// The port of the Render HTTP server.
    pub render_port: Option<String>,
    /// The name of the storage backend.
    pub store: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Network settings of the Carbon and Render servers.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct Graphite {
    /// The address to bind to. `0.0.0.0` binds all interfaces.
    host: IpAddr,
    /// Port of the Carbon plaintext protocol.
    carbon_port: u16,
    /// Port of the Render HTTP API.
    render_port: u16,
    /// Seconds after which an idle connection is closed.
    connection_timeout: u64,
    /// Milliseconds of silence after which buffered Carbon lines are flushed.
    connection_wait_timeout: u64,
    /// Bind one server per network interface.
    each_interface_binding: bool,
    /// Choose between per-interface and single binding based on the interface count.
    auto_interface_binding: bool,
    /// Number of retries when a server fails to bind.
    binding_retry_count: u32,
}

impl Default for Graphite {
    fn default() -> Self {
        Graphite {
            host: default_host(),
            carbon_port: 2003,
            render_port: 8080,
            connection_timeout: 60,
            connection_wait_timeout: 1000,
            each_interface_binding: true,
            auto_interface_binding: true,
            binding_retry_count: 0,
        }
    }
}

/// Control the internal metrics.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"graphite"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "graphite".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
        }
    }
}

/// Selects and configures the storage backend.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct Store {
    /// Name of the backend, `memory` or `empty`.
    kind: String,
    /// Resolution of stored data points in seconds.
    retention_interval: u64,
    /// Seconds data points are kept.
    retention_period: u64,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            kind: "memory".to_owned(),
            retention_interval: 300,
            retention_period: 3600,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct ConfigValues {
    #[serde(default)]
    graphite: Graphite,
    #[serde(default)]
    logging: graphite_log::LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    store: Store,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Clone, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from the command line.
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let graphite = &mut self.values.graphite;

        if let Some(host) = overrides.host {
            graphite.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(carbon_port) = overrides.carbon_port {
            graphite.carbon_port = carbon_port
                .parse::<u16>()
                .map_err(|err| ConfigError::for_field(err, "carbon_port"))?;
        }

        if let Some(render_port) = overrides.render_port {
            graphite.render_port = render_port
                .parse::<u16>()
                .map_err(|err| ConfigError::for_field(err, "render_port"))?;
        }

        if let Some(store) = overrides.store {
            if store.is_empty() {
                return Err(ConfigError::field("store"));
            }
            self.values.store.kind = store;
        }

        Ok(self)
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Writes the config into the given folder, creating the folder if needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(path))?;
        self.values.save(path)
    }

    /// Returns `true` if a config file exists in the given folder.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        ConfigValues::path(path.as_ref()).exists()
    }

    /// Returns the address the servers bind to.
    pub fn host(&self) -> IpAddr {
        self.values.graphite.host
    }

    /// Returns the port of the Carbon ingestion server.
    pub fn carbon_port(&self) -> u16 {
        self.values.graphite.carbon_port
    }

    /// Returns the port of the Render HTTP server.
    pub fn render_port(&self) -> u16 {
        self.values.graphite.render_port
    }

    /// Returns the socket address of the Carbon server.
    pub fn carbon_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host(), self.carbon_port())
    }

    /// Returns the socket address of the Render server.
    pub fn render_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host(), self.render_port())
    }

    /// Returns the idle time after which connections are closed.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.values.graphite.connection_timeout)
    }

    /// Returns the silence after which buffered Carbon lines are flushed.
    pub fn connection_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.values.graphite.connection_wait_timeout)
    }

    /// Returns `true` if one server is bound per network interface.
    pub fn each_interface_binding(&self) -> bool {
        self.values.graphite.each_interface_binding
    }

    /// Returns `true` if the binding policy depends on the number of interfaces.
    pub fn auto_interface_binding(&self) -> bool {
        self.values.graphite.auto_interface_binding
    }

    /// Returns the number of retries for failed binds.
    pub fn binding_retry_count(&self) -> u32 {
        self.values.graphite.binding_retry_count
    }

    /// Returns the settings of the servers and their manager.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host(),
            carbon_port: self.carbon_port(),
            render_port: self.render_port(),
            connection_timeout: self.connection_timeout(),
            connection_wait_timeout: self.connection_wait_timeout(),
            each_interface_binding: self.each_interface_binding(),
            auto_interface_binding: self.auto_interface_binding(),
            binding_retry_count: self.binding_retry_count(),
        }
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &graphite_log::LogConfig {
        &self.values.logging
    }

    /// Returns the socket address of statsd if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of internal metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags of internal metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag of internal metrics.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the name of the storage backend.
    pub fn store_kind(&self) -> &str {
        &self.values.store.kind
    }

    /// Returns the settings of the storage backend.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            retention_interval: Duration::from_secs(self.values.store.retention_interval),
            retention_period: Duration::from_secs(self.values.store.retention_period),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.carbon_addr(), "0.0.0.0:2003".parse().unwrap());
        assert_eq!(config.render_addr(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.connection_timeout(), Duration::from_secs(60));
        assert_eq!(config.connection_wait_timeout(), Duration::from_millis(1000));
        assert!(config.each_interface_binding());
        assert!(config.auto_interface_binding());
        assert_eq!(config.binding_retry_count(), 0);
        assert_eq!(config.store_kind(), "memory");
        assert_eq!(config.metrics_prefix(), "graphite");
    }

    #[test]
    fn test_server_config() {
        let config = Config::from_json_value(serde_json::json!({
            "graphite": {
                "host": "127.0.0.1",
                "carbon_port": 12003,
                "connection_wait_timeout": 250,
                "binding_retry_count": 3,
            }
        }))
        .unwrap();

        let server = config.server_config();
        assert_eq!(server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(server.carbon_port, 12003);
        assert_eq!(server.render_port, 8080);
        assert_eq!(server.connection_wait_timeout, Duration::from_millis(250));
        assert_eq!(server.binding_retry_count, 3);
    }

    #[test]
    fn test_bad_json() {
        let error = Config::from_json_value(serde_json::json!({
            "graphite": {"carbon_port": "not a port"}
        }))
        .unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadJson);
        assert!(error.source().is_some());
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                host: Some("127.0.0.1".to_owned()),
                carbon_port: Some("2004".to_owned()),
                render_port: None,
                store: Some("empty".to_owned()),
            })
            .unwrap();

        assert_eq!(config.carbon_addr(), "127.0.0.1:2004".parse().unwrap());
        assert_eq!(config.render_port(), 8080);
        assert_eq!(config.store_kind(), "empty");
    }

    #[test]
    fn test_apply_override_invalid() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                render_port: Some("99999".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field render_port)");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                render_port: Some("9090".to_owned()),
                ..Default::default()
            })
            .unwrap();

        assert!(!Config::exists(dir.path()));
        config.save(dir.path()).unwrap();
        assert!(Config::exists(dir.path()));

        let loaded = Config::from_path(dir.path()).unwrap();
        assert_eq!(loaded.render_port(), 9090);
        assert_eq!(loaded.to_yaml_string().unwrap(), config.to_yaml_string().unwrap());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
        assert!(error.to_string().starts_with("could not open config file (file "));
    }

    #[test]
    fn test_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yml"),
            "graphite:\n  render_port: 8081\nstore:\n  kind: empty\n",
        )
        .unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.render_port(), 8081);
        assert_eq!(config.carbon_port(), 2003);
        assert_eq!(config.store_kind(), "empty");
        assert_eq!(config.store_config().retention_period, Duration::from_secs(3600));
    }
}
