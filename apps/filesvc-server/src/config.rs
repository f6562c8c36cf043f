//! Configuration management for the file service
//!
//! Resolved once at startup and handed to each component by value.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding finalized files
    pub storage_dir: PathBuf,
    /// Directory holding in-progress uploads
    pub tmp_dir: PathBuf,
    /// What to do when a finalized file would land on an existing path
    pub on_collision: CollisionPolicy,
}

/// Policy applied when the final storage path is already taken on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Replace the existing file (atomic rename over it)
    Overwrite,
    /// Refuse with a conflict error
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Request body limit for upload routes
    pub max_body_bytes: usize,
    /// Sessions idle longer than this are aborted by the sweeper (0 = never)
    pub session_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Root that `?path=` arguments on the media endpoints resolve under
    pub media_root: PathBuf,
    /// Source used when a media request carries no `?path=`
    pub default_media: Option<PathBuf>,
    pub ffmpeg_path: String,
    /// Read size for range streaming and remux forwarding
    pub stream_chunk_bytes: usize,
}

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024 * 1024;
const DEFAULT_STREAM_CHUNK_BYTES: usize = 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            storage: StorageConfig {
                storage_dir: PathBuf::from("./storage"),
                tmp_dir: PathBuf::from("./tmp"),
                on_collision: CollisionPolicy::Overwrite,
            },
            database: DatabaseConfig {
                url: "sqlite:./filesvc.db".to_string(),
            },
            upload: UploadConfig {
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
                session_ttl_hours: 24,
            },
            media: MediaConfig {
                media_root: PathBuf::from("."),
                default_media: None,
                ffmpeg_path: "ffmpeg".to_string(),
                stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
            },
        }
    }
}

/// Error raised when an environment variable holds an unusable value
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {name}: {value}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                storage_dir: env::var("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.storage_dir),
                tmp_dir: env::var("TMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.tmp_dir),
                on_collision: match env::var("ON_NAME_COLLISION") {
                    Ok(value) => match value.to_lowercase().as_str() {
                        "overwrite" => CollisionPolicy::Overwrite,
                        "reject" => CollisionPolicy::Reject,
                        _ => {
                            return Err(ConfigError {
                                name: "ON_NAME_COLLISION",
                                value,
                            })
                        }
                    },
                    Err(_) => defaults.storage.on_collision,
                },
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            upload: UploadConfig {
                max_body_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.upload.max_body_bytes)?,
                session_ttl_hours: parse_var(
                    "SESSION_TTL_HOURS",
                    defaults.upload.session_ttl_hours,
                )?,
            },
            media: MediaConfig {
                media_root: env::var("MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.media.media_root),
                default_media: env::var("DEFAULT_MEDIA").ok().map(PathBuf::from),
                ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(defaults.media.ffmpeg_path),
                stream_chunk_bytes: parse_var(
                    "STREAM_CHUNK_BYTES",
                    defaults.media.stream_chunk_bytes,
                )?,
            },
        })
    }

    /// Configuration rooted in a scratch directory, used by tests
    pub fn for_root(root: &std::path::Path) -> Self {
        let mut config = Config::default();
        config.storage.storage_dir = root.join("storage");
        config.storage.tmp_dir = root.join("tmp");
        config.database.url = format!("sqlite://{}", root.join("filesvc.db").display());
        config.media.media_root = root.join("media");
        config
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError { name, value }),
        Err(_) => Ok(default),
    }
}
