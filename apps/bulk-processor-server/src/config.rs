//! Configuration management for the bulk processor server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default size limit for a single split part: 10MB
pub const DEFAULT_SPLIT_PART_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Completed uploads and in-flight session blobs
    pub upload_dir: PathBuf,
    /// Artifacts produced by tasks (masked files, split archives)
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Tasks allowed to run at the same time; the rest wait in PENDING
    pub max_concurrent_tasks: usize,
    pub split_part_size: u64,
    /// Finished task records older than this are dropped
    pub task_retention_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("./data/uploads"),
                output_dir: PathBuf::from("./data/outputs"),
            },
            database: DatabaseConfig {
                url: "sqlite:./data/records.db".to_string(),
            },
            processing: ProcessingConfig {
                max_concurrent_tasks: 4,
                split_part_size: DEFAULT_SPLIT_PART_SIZE,
                task_retention_hours: 24,
            },
        }
    }
}

impl Config {
    /// Build the configuration from environment variables.
    ///
    /// Every setting is optional; missing or unparsable values keep the default.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                upload_dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_dir),
                output_dir: env::var("OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.output_dir),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            processing: ProcessingConfig {
                max_concurrent_tasks: parse_var(
                    "MAX_CONCURRENT_TASKS",
                    defaults.processing.max_concurrent_tasks,
                )
                .max(1),
                split_part_size: parse_var(
                    "SPLIT_PART_SIZE_BYTES",
                    defaults.processing.split_part_size,
                )
                .max(1),
                task_retention_hours: parse_var(
                    "TASK_RETENTION_HOURS",
                    defaults.processing.task_retention_hours,
                ),
            },
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_falls_back_on_garbage() {
        env::set_var("BULK_TEST_GARBAGE_PORT", "not-a-port");
        assert_eq!(parse_var("BULK_TEST_GARBAGE_PORT", 3000u16), 3000);
        env::remove_var("BULK_TEST_GARBAGE_PORT");
    }

    #[test]
    fn test_parse_var_reads_value() {
        env::set_var("BULK_TEST_TASKS", "7");
        assert_eq!(parse_var("BULK_TEST_TASKS", 4usize), 7);
        env::remove_var("BULK_TEST_TASKS");
    }
}
