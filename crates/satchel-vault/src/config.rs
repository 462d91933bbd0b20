//! Vault configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::{KdfTier, MIN_KDF_ITERATIONS};
use crate::error::{Result, VaultError};

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the on-disk records
    pub data_dir: PathBuf,

    /// PBKDF2 iterations for wallet, contact and note encryption
    pub kdf_iterations: u32,

    /// PBKDF2 iterations for high-risk material (imported private keys)
    pub export_kdf_iterations: u32,

    /// How long a migration backup may still be rolled back (days)
    pub migration_rollback_window_days: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            kdf_iterations: KdfTier::Standard.iterations(),
            export_kdf_iterations: KdfTier::Export.iterations(),
            migration_rollback_window_days: 30,
        }
    }
}

impl VaultConfig {
    /// Platform data directory, e.g. `~/.local/share/satchel`
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("satchel")
    }

    /// Check iteration floors and the rollback window
    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::InvalidParameter(format!(
                "kdf_iterations must be at least {}",
                MIN_KDF_ITERATIONS
            )));
        }
        if self.export_kdf_iterations < self.kdf_iterations {
            return Err(VaultError::InvalidParameter(
                "export_kdf_iterations must not be below kdf_iterations".to_string(),
            ));
        }
        if self.migration_rollback_window_days == 0 {
            return Err(VaultError::InvalidParameter(
                "migration_rollback_window_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rollback_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.migration_rollback_window_days as i64)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Create the data directory if it doesn't exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::default();
        config.validate().unwrap();
        assert_eq!(config.kdf_iterations, 100_000);
        assert_eq!(config.export_kdf_iterations, 600_000);
        assert_eq!(config.rollback_window(), chrono::Duration::days(30));
        assert!(config.data_dir.ends_with("satchel"));
    }

    #[test]
    fn test_rejects_weak_iterations() {
        let config = VaultConfig {
            kdf_iterations: 10_000,
            ..VaultConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidParameter(_))
        ));

        let config = VaultConfig {
            export_kdf_iterations: 100_000,
            kdf_iterations: 200_000,
            ..VaultConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = VaultConfig {
            data_dir: dir.path().to_path_buf(),
            migration_rollback_window_days: 7,
            ..VaultConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(VaultConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: VaultConfig = serde_json::from_str(r#"{"kdf_iterations": 150000}"#).unwrap();
        assert_eq!(config.kdf_iterations, 150_000);
        assert_eq!(config.migration_rollback_window_days, 30);
    }
}
