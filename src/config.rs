//! Per-profile credentials.
//!
//! Profiles live in one TOML file, one table per profile:
//!
//! ```toml
//! [default]
//! host = "https://ci.example.com"
//! user = "admin"
//! token = "11aa..."
//! crumb_header = "Jenkins-Crumb"
//! crumb = "0f3c..."
//! ```
//!
//! Any key can be overridden from the environment as `JENKINSON_PROFILE_<PROFILE>__<KEY>`, e.g.
//! `JENKINSON_PROFILE_DEFAULT__TOKEN`. The file location itself can be moved with
//! `JENKINSON_CREDENTIALS`.

use crate::crumb::Crumb;
use crate::error::{Error, Result};
use config::{Environment, File, FileFormat, Value, ValueKind};
use directories::ProjectDirs;
use log::*;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

static CRATE_NAME: &str = "jenkinson";
pub const DEFAULT_PROFILE: &str = "default";
const PATH_VAR: &str = "JENKINSON_CREDENTIALS";
const ENV_PREFIX: &str = "JENKINSON_PROFILE";

static CONFIG_DIR: Lazy<Option<PathBuf>> = Lazy::new(|| {
    ProjectDirs::from("", "", CRATE_NAME).map(|dirs| dirs.config_dir().to_path_buf())
});

/// Credentials for one Jenkins server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Profile {
    pub host: String,
    pub user: String,
    /// API token
    pub token: String,
    pub crumb_header: String,
    pub crumb: String,
}

impl Profile {
    pub fn new(host: String, user: String, token: String) -> Self {
        Self {
            host,
            user,
            token,
            ..Self::default()
        }
    }

    /// The stored crumb, if the handshake was done when the profile was configured
    pub fn crumb(&self) -> Option<Crumb> {
        if self.crumb_header.is_empty() {
            return None;
        }
        Some(Crumb {
            header: self.crumb_header.clone(),
            value: self.crumb.clone(),
        })
    }

    pub fn set_crumb(&mut self, crumb: Crumb) {
        self.crumb_header = crumb.header;
        self.crumb = crumb.value;
    }
}

/// Where credentials are kept unless told otherwise
pub fn default_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(PATH_VAR) {
        return Ok(PathBuf::from(path));
    }
    CONFIG_DIR
        .as_ref()
        .map(|dir| dir.join("credentials.toml"))
        .ok_or_else(|| {
            Error::Config(config::ConfigError::Message(
                "could not determine a configuration directory".to_string(),
            ))
        })
}

/// All stored profiles
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    profiles: BTreeMap<String, Profile>,
}

impl CredentialStore {
    pub fn load_default() -> Result<Self> {
        Self::load(default_path()?)
    }

    /// Read profiles from `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        debug!("Loading credentials from {}", path.display());
        let settings = config::Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let raw: BTreeMap<String, Value> = settings.try_deserialize()?;
        let mut profiles = BTreeMap::new();
        for (name, value) in raw {
            if matches!(value.kind, ValueKind::Table(_)) {
                profiles.insert(name, value.try_deserialize()?);
            } else {
                warn!("Ignoring {}: not a profile table", name);
            }
        }
        Ok(Self { path, profiles })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles.get(name).ok_or_else(|| Error::MissingProfile {
            profile: name.to_string(),
            path: self.path.clone(),
        })
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Add or replace a profile. Call [`CredentialStore::save`] to persist it.
    pub fn set_profile(&mut self, name: &str, profile: Profile) {
        self.profiles.insert(name.to_string(), profile);
    }

    /// Write all profiles back, creating the file and its directory on first use
    pub fn save(&self) -> Result<()> {
        let write_error = |message: String| Error::ConfigWrite {
            path: self.path.clone(),
            message,
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| write_error(e.to_string()))?;
        }
        let text = toml::to_string(&self.profiles).map_err(|e| write_error(e.to_string()))?;
        write_private(&self.path, text.as_bytes()).map_err(|e| write_error(e.to_string()))?;
        info!("Saved credentials to {}", self.path.display());
        Ok(())
    }
}

/// Write `contents` to a file only its owner can read, without a window where it is readable
/// by others
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to new files
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
