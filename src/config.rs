//! On-disk configuration (`config.toml`) and the `secret.json` key file.

use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ref_::Ref;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("secret.json key length is wrong")]
    BadKeyLength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_dial_concurrency")]
    pub dial_concurrency: usize,
    #[serde(default)]
    pub seed_pubs: Vec<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8008".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_dial_concurrency() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            dial_concurrency: default_dial_concurrency(),
            seed_pubs: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("store.redb")
    }

    pub fn blob_store_path(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join("secret.json")
    }
}

/// The on-disk key-file shape: base64 public/private halves plus the ref's
/// textual form for convenience, matching the field names the reference
/// implementation's own `secret.json` uses.
#[derive(Debug, Serialize, Deserialize)]
struct SecretJson {
    id: String,
    public: String,
    private: String,
    curve: String,
}

/// Appends the `.ed25519` curve suffix used for both halves of the
/// keypair in `secret.json`.
fn b64_suffixed(bytes: &[u8]) -> String {
    format!(
        "{}.ed25519",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
    )
}

fn parse_b64_suffixed(s: &str) -> Result<Vec<u8>, ConfigError> {
    let b64 = s.strip_suffix(".ed25519").unwrap_or(s);
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
        .map_err(|_| ConfigError::BadKeyLength)
}

/// Load `secret.json`, generating and persisting a fresh identity if it
/// does not exist yet.
pub fn load_or_create_identity(path: &Path) -> Result<SigningKey, ConfigError> {
    if path.exists() {
        let text = std::fs::read_to_string(path)?;
        let secret: SecretJson = serde_json::from_str(&text)?;
        let private_bytes = parse_b64_suffixed(&secret.private)?;
        let keypair: [u8; 64] = private_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::BadKeyLength)?;
        return SigningKey::from_keypair_bytes(&keypair).map_err(|_| ConfigError::BadKeyLength);
    }

    let key = SigningKey::generate(&mut OsRng);
    let identity = Ref::feed(key.verifying_key().to_bytes());
    let secret = SecretJson {
        id: identity.to_string_form(),
        public: b64_suffixed(key.verifying_key().as_bytes()),
        private: b64_suffixed(&key.to_keypair_bytes()),
        curve: "ed25519".to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&secret)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.json");
        let first = load_or_create_identity(&path).unwrap();
        let second = load_or_create_identity(&path).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn default_config_has_sensible_paths() {
        let cfg = Config::default();
        assert_eq!(cfg.database_path(), PathBuf::from("./store.redb"));
    }
}
