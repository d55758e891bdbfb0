//! Runtime configuration: command-line flags with environment fallbacks.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::database::DatabaseConfig;
use crate::server::DEFAULT_MAX_REQUEST_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--db-max-open must be at least 1")]
    NoConnections,

    #[error("--db-max-idle ({idle}) cannot exceed --db-max-open ({open})")]
    IdleExceedsOpen { idle: usize, open: usize },

    #[error("--gzip-level must be between 0 and 9, got {0}")]
    GzipLevel(u32),

    #[error("--max-request-bytes must be at least 1")]
    NoRequestBytes,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "record-store")]
#[command(about = "Create and fetch JSON records over HTTP, stored in SQLite.")]
#[command(version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8081", env = "RECORD_STORE_LISTEN")]
    pub listen: String,

    /// SQLite database file
    #[arg(long, default_value = "/litefs/db.db", env = "RECORD_STORE_DB_PATH")]
    pub db_path: PathBuf,

    /// Maximum simultaneously open database connections
    #[arg(long, default_value_t = 25, env = "RECORD_STORE_DB_MAX_OPEN")]
    pub db_max_open: usize,

    /// Connections kept open between requests
    #[arg(long, default_value_t = 5, env = "RECORD_STORE_DB_MAX_IDLE")]
    pub db_max_idle: usize,

    /// gzip level for compressed responses (0-9)
    #[arg(long, default_value_t = 6, env = "RECORD_STORE_GZIP_LEVEL")]
    pub gzip_level: u32,

    /// Largest request, head plus body, accepted before answering 413
    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST_SIZE, env = "RECORD_STORE_MAX_REQUEST_BYTES")]
    pub max_request_bytes: usize,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_max_open == 0 {
            return Err(ConfigError::NoConnections);
        }
        if self.db_max_idle > self.db_max_open {
            return Err(ConfigError::IdleExceedsOpen {
                idle: self.db_max_idle,
                open: self.db_max_open,
            });
        }
        if self.gzip_level > 9 {
            return Err(ConfigError::GzipLevel(self.gzip_level));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::NoRequestBytes);
        }
        Ok(())
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            path: self.db_path.clone(),
            max_open: self.db_max_open,
            max_idle: self.db_max_idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("record-store").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--listen",
            "127.0.0.1:9000",
            "--db-path",
            "/tmp/x.db",
            "--db-max-open",
            "4",
            "--db-max-idle",
            "2",
            "--gzip-level",
            "1",
            "--max-request-bytes",
            "1024",
        ]);
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.max_request_bytes, 1024);
        assert_eq!(config.validate(), Ok(()));

        let db = config.database();
        assert_eq!(db.max_open, 4);
        assert_eq!(db.max_idle, 2);
    }

    #[test]
    fn validation() {
        let mut config = parse(&["--db-max-open", "3", "--db-max-idle", "3"]);
        assert_eq!(config.validate(), Ok(()));

        config.db_max_idle = 4;
        assert_eq!(
            config.validate(),
            Err(ConfigError::IdleExceedsOpen { idle: 4, open: 3 })
        );

        config.db_max_open = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoConnections));

        let config = parse(&["--gzip-level", "12"]);
        assert_eq!(config.validate(), Err(ConfigError::GzipLevel(12)));

        let config = parse(&["--max-request-bytes", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::NoRequestBytes));
    }

    #[test]
    fn request_limit_defaults_to_eight_mib() {
        assert_eq!(parse(&[]).max_request_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }
}
