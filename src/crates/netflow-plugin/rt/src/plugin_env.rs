//! Directories the plugin host exposes through the environment.

use std::path::{Path, PathBuf};

const USER_CONFIG_DIR_ENV: &str = "NETFLOW_USER_CONFIG_DIR";
const STOCK_CONFIG_DIR_ENV: &str = "NETFLOW_STOCK_CONFIG_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginEnv {
    pub user_config_dir: Option<PathBuf>,
    pub stock_config_dir: Option<PathBuf>,
}

impl PluginEnv {
    pub fn from_environment() -> Self {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        let dir = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        Self {
            user_config_dir: dir(USER_CONFIG_DIR_ENV),
            stock_config_dir: dir(STOCK_CONFIG_DIR_ENV),
        }
    }

    /// True when the host provided at least one configuration directory.
    pub fn has_config_dirs(&self) -> bool {
        self.user_config_dir.is_some() || self.stock_config_dir.is_some()
    }

    /// Candidate paths for `file_name`, user directory first.
    pub fn config_candidates(&self, file_name: &str) -> Vec<PathBuf> {
        [&self.user_config_dir, &self.stock_config_dir]
            .into_iter()
            .flatten()
            .map(|dir| dir.join(file_name))
            .collect()
    }

    /// First candidate for `file_name` that exists as a regular file.
    pub fn find_config_file(&self, file_name: &str) -> Option<PathBuf> {
        self.config_candidates(file_name)
            .into_iter()
            .find(|path| Path::is_file(path))
    }
}
