//! Configure, mount and unmount.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use super::config::parent_dir;
use super::{LogConfig, VolfileServer, VolfileSource, Volume, VolumeConfig, VolumeState};
use crate::backend::{Backend, RemoteFs};
use crate::error::{ConfigError, Error, Result, UsageError, errno};

impl<B: Backend> Volume<B> {
    /// Create and configure a volume from `config`, leaving it
    /// [`Configured`](VolumeState::Configured).
    pub fn from_config(backend: B, config: &VolumeConfig) -> Result<Self> {
        let mut volume = Self::new(backend, config.volume.clone());
        match config.source {
            VolfileSource::Servers(ref servers) => volume.init_with_servers(servers)?,
            VolfileSource::File(ref volfile) => volume.init_with_volfile(volfile)?,
        }
        if let Some(ref logging) = config.logging {
            volume.set_logging(logging)?;
        }
        Ok(volume)
    }

    /// Configure the volume to fetch its volfile from `hosts`, each over
    /// TCP on the default port, tried in order at mount time.
    pub fn init<S: AsRef<str>>(&mut self, hosts: &[S]) -> Result<()> {
        let servers: Vec<VolfileServer> = hosts
            .iter()
            .map(|host| VolfileServer::new(host.as_ref()))
            .collect();
        self.init_with_servers(&servers)
    }

    /// Configure the volume with an ordered failover list of volfile servers.
    ///
    /// Each server is registered individually; the first registration that
    /// fails is reported with its position in the list.
    #[instrument(level = "info", skip(self, servers), fields(volume = %self.name, servers = servers.len()))]
    pub fn init_with_servers(&mut self, servers: &[VolfileServer]) -> Result<()> {
        self.require(VolumeState::New, "configure")?;
        self.check_name()?;
        if servers.is_empty() {
            return Err(ConfigError::NoVolfileServers {
                volume: self.name.clone(),
            }
            .into());
        }

        let fs = self.create_fs()?;
        let total = servers.len();
        for (index, server) in servers.iter().enumerate() {
            fs.set_volfile_server(server.transport.as_str(), &server.host, server.port)
                .map_err(|source| ConfigError::VolfileServer {
                    volume: self.name.clone(),
                    index,
                    total,
                    host: server.host.clone(),
                    source,
                })?;
            debug!(%server, index, "volfile server registered");
        }

        self.configured(fs, VolfileSource::Servers(servers.to_vec()));
        Ok(())
    }

    /// Configure the volume from a local volfile.
    #[instrument(level = "info", skip(self, volfile), fields(volume = %self.name, volfile = %volfile.as_ref().display()))]
    pub fn init_with_volfile(&mut self, volfile: impl AsRef<Path>) -> Result<()> {
        let volfile = volfile.as_ref();
        self.require(VolumeState::New, "configure")?;
        self.check_name()?;

        let fs = self.create_fs()?;
        fs.set_volfile(volfile)
            .map_err(|source| ConfigError::Volfile {
                volume: self.name.clone(),
                path: volfile.to_path_buf(),
                source,
            })?;

        self.configured(fs, VolfileSource::File(volfile.to_path_buf()));
        Ok(())
    }

    /// Point the remote library's log at `config.target` with the given level.
    ///
    /// Allowed once configured, also while mounted. A custom log file is
    /// rejected up front when its directory does not exist.
    #[instrument(level = "info", skip(self, config), fields(volume = %self.name, level = ?config.level))]
    pub fn set_logging(&self, config: &LogConfig) -> Result<()> {
        let fs = match (self.state, self.fs.as_ref()) {
            (VolumeState::Configured | VolumeState::Mounted, Some(fs)) => fs,
            _ => return Err(self.invalid_transition("set logging")),
        };

        if let Some(file) = config.target.file() {
            let dir = parent_dir(file);
            let not_dir = match std::fs::metadata(dir) {
                Ok(meta) if meta.is_dir() => None,
                Ok(_) => Some(errno(libc::ENOTDIR)),
                Err(source) => Some(source),
            };
            if let Some(source) = not_dir {
                return Err(ConfigError::LogDirectory {
                    path: dir.to_path_buf(),
                    source,
                }
                .into());
            }
        }

        fs.set_logging(config.target.file(), config.level.as_raw())
            .map_err(|source| ConfigError::Logging {
                volume: self.name.clone(),
                source,
            })?;
        debug!(directory = %config.target.directory().display(), "remote logging configured");
        *self.logging.lock() = Some(config.clone());
        Ok(())
    }

    /// Connect to the volume.
    ///
    /// On failure the volume stays configured and unusable for I/O.
    #[instrument(level = "info", skip(self), fields(volume = %self.name))]
    pub fn mount(&mut self) -> Result<()> {
        self.require(VolumeState::Configured, "mount")?;
        let Some(fs) = self.fs.as_ref() else {
            return Err(self.invalid_transition("mount"));
        };
        fs.init().map_err(|source| Error::Mount {
            volume: self.name.clone(),
            source,
        })?;
        self.state = VolumeState::Mounted;
        info!("volume mounted");
        Ok(())
    }

    /// Tear down the mount. Terminal, also when the remote layer reports a
    /// failure: the remote object is released either way.
    ///
    /// Descriptors still registered (leaked through `mem::forget`, or left
    /// behind by a failed close) are closed first.
    #[instrument(level = "info", skip(self), fields(volume = %self.name))]
    pub fn unmount(&mut self) -> Result<()> {
        self.require(VolumeState::Mounted, "unmount")?;
        self.close_leaked();
        let Some(fs) = self.fs.take() else {
            return Err(self.invalid_transition("unmount"));
        };
        self.state = VolumeState::Unmounted;
        fs.fini().map_err(|source| Error::Unmount {
            volume: self.name.clone(),
            source,
        })?;
        info!("volume unmounted");
        Ok(())
    }

    fn configured(&mut self, fs: B::Fs, source: VolfileSource) {
        self.fs = Some(fs);
        self.source = Some(source);
        self.state = VolumeState::Configured;
        debug!("volume configured");
    }

    fn check_name(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingVolumeName.into());
        }
        Ok(())
    }

    fn create_fs(&self) -> Result<B::Fs> {
        self.backend.new_fs(&self.name).map_err(|source| {
            ConfigError::HandleCreation {
                volume: self.name.clone(),
                source,
            }
            .into()
        })
    }

    fn require(&self, expected: VolumeState, op: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(self.invalid_transition(op));
        }
        Ok(())
    }

    fn invalid_transition(&self, op: &'static str) -> Error {
        UsageError::InvalidTransition {
            volume: self.name.clone(),
            op,
            state: self.state,
        }
        .into()
    }

    fn close_leaked(&self) {
        let Some(fs) = self.fs.as_ref() else {
            return;
        };
        let leaked = self.handles.drain();
        if leaked.is_empty() {
            return;
        }
        warn!(volume = %self.name, count = leaked.len(), "closing descriptors still open at teardown");
        for (id, fd) in leaked {
            if let Err(e) = fs.close(fd) {
                warn!(volume = %self.name, id, error = %e, "failed to close descriptor");
            }
        }
    }
}

impl<B: Backend> Drop for Volume<B> {
    fn drop(&mut self) {
        if self.fs.is_none() {
            return;
        }
        self.close_leaked();
        if let Some(fs) = self.fs.take()
            && let Err(e) = fs.fini()
        {
            warn!(volume = %self.name, error = %e, "failed to finalize volume on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use crate::error::HandleError;

    #[test]
    fn test_happy_path_transitions() {
        let backend = MemoryBackend::new();
        let mut volume = Volume::new(backend.clone(), "gv0");
        assert_eq!(volume.state(), VolumeState::New);
        volume.init(&["h1", "h2"]).unwrap();
        assert_eq!(volume.state(), VolumeState::Configured);
        volume.mount().unwrap();
        assert!(volume.is_mounted());
        assert_eq!(backend.connected_server("gv0").as_deref(), Some("h1"));
        volume.unmount().unwrap();
        assert_eq!(volume.state(), VolumeState::Unmounted);
        assert_eq!(backend.connected_server("gv0"), None);
    }

    #[test]
    fn test_mount_before_configure_is_usage_error() {
        let mut volume = Volume::new(MemoryBackend::new(), "gv0");
        let err = volume.mount().unwrap_err();
        assert!(matches!(
            err,
            Error::Usage(UsageError::InvalidTransition {
                op: "mount",
                state: VolumeState::New,
                ..
            })
        ));
    }

    #[test]
    fn test_configure_twice_is_rejected() {
        let mut volume = Volume::new(MemoryBackend::new(), "gv0");
        volume.init(&["h1"]).unwrap();
        assert!(matches!(
            volume.init(&["h2"]),
            Err(Error::Usage(UsageError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_empty_name_and_empty_servers() {
        let mut unnamed = Volume::new(MemoryBackend::new(), "");
        assert!(matches!(
            unnamed.init(&["h1"]),
            Err(Error::Config(ConfigError::MissingVolumeName))
        ));
        let mut volume = Volume::new(MemoryBackend::new(), "gv0");
        let none: [&str; 0] = [];
        assert!(matches!(
            volume.init(&none),
            Err(Error::Config(ConfigError::NoVolfileServers { .. }))
        ));
        assert_eq!(volume.state(), VolumeState::New);
    }

    #[test]
    fn test_unmount_after_unmount_is_rejected() {
        let mut volume = Volume::new(MemoryBackend::new(), "gv0");
        volume.init(&["h1"]).unwrap();
        volume.mount().unwrap();
        volume.unmount().unwrap();
        assert!(matches!(
            volume.unmount(),
            Err(Error::Usage(UsageError::InvalidTransition { op: "unmount", .. }))
        ));
        assert!(matches!(
            volume.stat("/"),
            Err(Error::Handle(HandleError::VolumeNotMounted {
                state: VolumeState::Unmounted,
                ..
            }))
        ));
    }

    #[test]
    fn test_set_logging_requires_configuration() {
        let volume = Volume::new(MemoryBackend::new(), "gv0");
        assert!(matches!(
            volume.set_logging(&LogConfig::default()),
            Err(Error::Usage(UsageError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_drop_finalizes_mounted_volume() {
        let backend = MemoryBackend::new();
        {
            let mut volume = Volume::new(backend.clone(), "gv0");
            volume.init(&["h1"]).unwrap();
            volume.mount().unwrap();
            assert!(backend.connected_server("gv0").is_some());
        }
        assert_eq!(backend.connected_server("gv0"), None);
    }
}
