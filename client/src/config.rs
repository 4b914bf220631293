//! Client configuration: which clouds to disperse shares across (and
//! the Key Manager endpoint for each), loaded from a TOML file under
//! the platform config directory, same shape as the inherited
//! `Config::load`/`Config::save` pair.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEndpoint {
    pub name: String,
    pub meta_addr: String,
    pub data_addr: String,
    pub km_addr: String,
    pub km_tls_name: String,
    /// Path to this cloud's Key Manager public key (`n_hex`/`e_hex`
    /// JSON), provisioned out of band per §A.4's blinded key exchange.
    pub km_pubkey_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub clouds: Vec<CloudEndpoint>,
    /// Erasure parameter `k`: shares needed to reconstruct a segment.
    pub k: Option<usize>,
    pub user_id: Option<u32>,
}

impl Config {
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "dispersion", "disperse")
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn require_clouds(&self) -> anyhow::Result<()> {
        if self.clouds.is_empty() {
            anyhow::bail!("no clouds configured. Run: disperse setup");
        }
        Ok(())
    }

    pub fn n(&self) -> usize {
        self.clouds.len()
    }

    /// Data+parity shares per segment: one configured cloud is always
    /// that segment's Key Manager and stores no data/meta share for it
    /// (§4.3 "k+m = N−1 data shares"), so the codec only ever spreads
    /// shares over the remaining `N-1` clouds.
    pub fn data_shares(&self) -> usize {
        self.n().saturating_sub(1).max(1)
    }

    pub fn k(&self) -> usize {
        self.k.unwrap_or_else(|| self.data_shares().saturating_sub(1).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_defaults_to_n_minus_one() {
        let config = Config {
            clouds: vec![
                CloudEndpoint {
                    name: "a".into(),
                    meta_addr: "x".into(),
                    data_addr: "x".into(),
                    km_addr: "x".into(),
                    km_tls_name: "x".into(),
                    km_pubkey_path: "x".into(),
                };
                4
            ],
            k: None,
            user_id: None,
        };
        assert_eq!(config.n(), 4);
        assert_eq!(config.data_shares(), 3);
        assert_eq!(config.k(), 2);
    }
}
