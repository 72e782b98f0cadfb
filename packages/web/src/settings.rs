use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Server {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Shared secret for mutating endpoints. Empty disables the check.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct Admin {
    pub token: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    /// Holds `db.json`, `cover.json` and the legacy seed files.
    pub data: PathBuf,
    /// Served under `/assets`; uploads land in its `uploads` directory.
    pub assets: PathBuf,
    /// Largest accepted request body, in bytes.
    pub limit: usize,
}

impl Storage {
    pub fn uploads(&self) -> PathBuf {
        self.assets.join("uploads")
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            data: "data".into(),
            assets: "assets".into(),
            limit: 25 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub admin: Admin,
    pub storage: Storage,
}

impl Settings {
    /// Defaults, then `config.toml` if present, then `SECTION_KEY` environment variables
    /// (`ADMIN_TOKEN`, `SERVER_PORT`, `STORAGE_DATA`, ...).
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("admin.token", "")?
            .set_default("storage.data", "data")?
            .set_default("storage.assets", "assets")?
            .set_default("storage.limit", 25 * 1024 * 1024)?
            .add_source(
                File::with_name("config.toml")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::default().separator("_"))
            .build()?;

        config.try_deserialize()
    }

    /// Settings rooted at `dir`, used by tests and embedders.
    pub fn rooted(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            storage: Storage {
                data: dir.join("data"),
                assets: dir.join("assets"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin.token = token.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::set_var;

    #[test]
    fn test_settings() {
        set_var("ADMIN_TOKEN", "s3cret");
        set_var("SERVER_PORT", "8081");
        set_var("STORAGE_DATA", "/srv/cms/data");
        let settings = Settings::new().unwrap_or_default();
        assert_eq!(settings.admin.token, "s3cret");
        assert_eq!(settings.server.addr(), "0.0.0.0:8081");
        assert_eq!(settings.storage.data, PathBuf::from("/srv/cms/data"));
        assert_eq!(settings.storage.uploads(), PathBuf::from("assets/uploads"));
        assert_eq!(settings.storage.limit, 25 * 1024 * 1024);
    }

    #[test]
    fn test_rooted() {
        let settings = Settings::rooted("/tmp/site").with_admin_token("t");
        assert_eq!(settings.storage.uploads(), PathBuf::from("/tmp/site/assets/uploads"));
        assert_eq!(settings.admin.token, "t");
    }
}
