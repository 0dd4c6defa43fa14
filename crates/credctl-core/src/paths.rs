//! Filesystem layout of a credctl installation.
//!
//! Everything lives under a single data directory, `~/.credctl` by default:
//!
//! ```text
//! ~/.credctl/
//!   agent.sock            admin socket (full access)
//!   agent-readonly.sock   read-only socket (get/list/describe)
//!   config.toml           optional configuration
//!   daemon.log            log file of a backgrounded daemon
//!   providers/<name>.json persisted provider records
//! ```

use std::path::{Path, PathBuf};

/// Environment variable that overrides socket discovery on the client.
pub const SOCKET_ENV: &str = "CREDCTL_SOCK";

/// Environment variable exported for the read-only socket.
pub const READONLY_SOCKET_ENV: &str = "CREDCTL_RO_SOCK";

const DATA_DIR_NAME: &str = ".credctl";
const ADMIN_SOCKET_NAME: &str = "agent.sock";
const READONLY_SOCKET_NAME: &str = "agent-readonly.sock";
const PROVIDERS_DIR_NAME: &str = "providers";
const CONFIG_FILE_NAME: &str = "config.toml";
const LOG_FILE_NAME: &str = "daemon.log";

/// Resolved locations of sockets, provider records and config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Use `root` as the data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default data directory, `~/.credctl`.
    ///
    /// Returns `None` if the home directory cannot be determined.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_socket(&self) -> PathBuf {
        self.root.join(ADMIN_SOCKET_NAME)
    }

    pub fn readonly_socket(&self) -> PathBuf {
        self.root.join(READONLY_SOCKET_NAME)
    }

    pub fn providers_dir(&self) -> PathBuf {
        self.root.join(PROVIDERS_DIR_NAME)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_root() {
        let paths = Paths::new("/data/credctl");
        assert_eq!(paths.admin_socket(), PathBuf::from("/data/credctl/agent.sock"));
        assert_eq!(
            paths.readonly_socket(),
            PathBuf::from("/data/credctl/agent-readonly.sock")
        );
        assert_eq!(paths.providers_dir(), PathBuf::from("/data/credctl/providers"));
        assert_eq!(paths.config_file(), PathBuf::from("/data/credctl/config.toml"));
    }

    #[test]
    fn default_root_is_hidden_dir_in_home() {
        if let Some(root) = Paths::default_root() {
            assert!(root.ends_with(".credctl"));
        }
    }
}
