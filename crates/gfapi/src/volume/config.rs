//! Declarative volume configuration.
//!
//! A [`VolumeConfig`] names the volume, where its volfile comes from and,
//! optionally, how the remote library should log for this volume. Logging is
//! part of each volume's configuration so several volumes in one process stay
//! independently configurable.
//!
//! ```
//! use gfapi::{VolfileSource, VolumeConfig};
//!
//! let config = VolumeConfig::from_json(r#"{"volume":"gv0","source":{"servers":[{"host":"h1"}]}}"#)?;
//! assert_eq!(config.volume, "gv0");
//! match config.source {
//!     VolfileSource::Servers(ref servers) => assert_eq!(servers[0].port, 24007),
//!     VolfileSource::File(_) => unreachable!(),
//! }
//! # Ok::<(), gfapi::error::ConfigError>(())
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port of the management daemon serving volfiles.
pub const DEFAULT_VOLFILE_PORT: u16 = 24007;

/// Log directory used when no explicit log target is given.
pub const DEFAULT_LOG_DIR: &str = "/var/log/glusterfs";

/// Environment variable overriding [`DEFAULT_LOG_DIR`].
pub const LOG_DIR_ENV: &str = "GFAPI_LOG_DIR";

/// The directory the remote library logs to when the target is [`LogTarget::Default`].
pub fn default_log_dir() -> PathBuf {
    std::env::var_os(LOG_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from)
}

/// Transport used to reach a volfile server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Rdma,
    /// Local socket; `host` is the socket path.
    Unix,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Rdma => "rdma",
            Transport::Unix => "unix",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_port() -> u16 {
    DEFAULT_VOLFILE_PORT
}

/// One management endpoint in the failover list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolfileServer {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: Transport,
}

impl VolfileServer {
    /// A TCP endpoint on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_VOLFILE_PORT,
            transport: Transport::Tcp,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }
}

impl fmt::Display for VolfileServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}:{}", self.transport, self.host, self.port)
    }
}

/// Where the volume topology comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolfileSource {
    /// Servers consulted in order at mount time.
    Servers(Vec<VolfileServer>),
    /// A local volfile.
    File(PathBuf),
}

/// Severity threshold of the remote library's log.
///
/// Discriminants match the native `gf_loglevel_t` values.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum LogLevel {
    None = 0,
    Emerg = 1,
    Alert = 2,
    Critical = 3,
    Error = 4,
    Warning = 5,
    Notice = 6,
    #[default]
    Info = 7,
    Debug = 8,
    Trace = 9,
}

impl LogLevel {
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Destination of the remote library's log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum LogTarget {
    /// The library's default location, see [`default_log_dir`].
    #[default]
    Default,
    File(PathBuf),
}

impl LogTarget {
    /// An empty path selects [`LogTarget::Default`].
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.as_os_str().is_empty() {
            LogTarget::Default
        } else {
            LogTarget::File(path)
        }
    }

    /// The explicit log file, if any.
    pub fn file(&self) -> Option<&Path> {
        match self {
            LogTarget::Default => None,
            LogTarget::File(path) => Some(path),
        }
    }

    /// Directory the log ends up in.
    pub fn directory(&self) -> PathBuf {
        match self {
            LogTarget::Default => default_log_dir(),
            LogTarget::File(path) => parent_dir(path).to_path_buf(),
        }
    }
}

// Serialized as a plain path string, "" meaning the default location.
impl Serialize for LogTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LogTarget::Default => serializer.serialize_str(""),
            LogTarget::File(path) => path.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for LogTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PathBuf::deserialize(deserializer).map(LogTarget::from_path)
    }
}

/// Directory containing `path`; a bare file name lives in the current directory.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Per-volume logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub target: LogTarget,
    #[serde(default)]
    pub level: LogLevel,
}

impl LogConfig {
    pub fn new(target: LogTarget, level: LogLevel) -> Self {
        Self { target, level }
    }
}

/// Everything needed to bring a volume to the configured state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub volume: String,
    pub source: VolfileSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LogConfig>,
}

impl VolumeConfig {
    /// Servers given by host name, TCP on the default port.
    pub fn with_servers<S: AsRef<str>>(volume: impl Into<String>, hosts: &[S]) -> Self {
        Self {
            volume: volume.into(),
            source: VolfileSource::Servers(
                hosts
                    .iter()
                    .map(|h| VolfileServer::new(h.as_ref()))
                    .collect(),
            ),
            logging: None,
        }
    }

    pub fn with_volfile(volume: impl Into<String>, volfile: impl Into<PathBuf>) -> Self {
        Self {
            volume: volume.into(),
            source: VolfileSource::File(volfile.into()),
            logging: None,
        }
    }

    #[must_use]
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
