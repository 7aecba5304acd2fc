use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dialect::Dialect;

/// Env var naming a server root; when set, databases live at `{root}{name}`
pub const DB_ROOT_ENV: &str = "WALLETDB_DB_ROOT";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalletDbConfig {
    /// Database file or connection string
    pub database: Option<String>,
    pub dialect: Option<Dialect>,
    /// tracing filter directive, e.g. `info` or `walletdb=debug`
    pub log_level: Option<String>,
    /// Layout to create when the database is new
    pub db_version: Option<u32>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("walletdb.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".walletdb").join("wallet.sqlite")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<WalletDbConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: WalletDbConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &WalletDbConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Connection string for a database. With a server root the file name is
/// appended to it, otherwise the local path is used through the SQLite
/// driver.
pub fn connection_string(db_path: &Path, root: Option<&str>) -> String {
    match root {
        Some(root) => {
            let name = db_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}{}", root, name)
        }
        None => format!("sqlite:///{}", db_path.display()),
    }
}

/// Root from the environment, if set and non-empty
pub fn db_root_from_env() -> Option<String> {
    std::env::var(DB_ROOT_ENV).ok().filter(|v| !v.is_empty())
}
