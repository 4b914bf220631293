//! Server configuration: a `.env`/environment layer for secrets and
//! ports (via `dotenvy`), plus the on-disk root config file the spec's
//! disk layout calls for — a flat `key = value` text file listing this
//! cloud's identity and its sibling clouds' addresses, read once at
//! startup and never written back.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server_name: String,
    pub data_root: String,
    pub meta_port: u16,
    pub data_port: u16,
    pub km_port: u16,
    pub km_tls_cert: String,
    pub km_tls_key: String,
    pub km_rsa_key_path: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_name: std::env::var("SERVER_NAME").unwrap_or_else(|_| "dispersiond".to_string()),
            data_root: std::env::var("DATA_ROOT").unwrap_or_else(|_| "./data".to_string()),
            meta_port: std::env::var("META_PORT").unwrap_or_else(|_| "9001".to_string()).parse()?,
            data_port: std::env::var("DATA_PORT").unwrap_or_else(|_| "9002".to_string()).parse()?,
            km_port: std::env::var("KM_PORT").unwrap_or_else(|_| "9443".to_string()).parse()?,
            km_tls_cert: std::env::var("KM_TLS_CERT").unwrap_or_else(|_| "./km-cert.pem".to_string()),
            km_tls_key: std::env::var("KM_TLS_KEY").unwrap_or_else(|_| "./km-key.pem".to_string()),
            km_rsa_key_path: std::env::var("KM_RSA_KEY_PATH").unwrap_or_else(|_| "./km-rsa.json".to_string()),
        })
    }

    pub fn indices_path(&self) -> PathBuf {
        Path::new(&self.data_root).join("indices")
    }

    pub fn recipes_path(&self) -> PathBuf {
        Path::new(&self.data_root).join("recipes")
    }

    pub fn meta_containers_path(&self) -> PathBuf {
        Path::new(&self.data_root).join("containers").join("meta")
    }

    pub fn data_containers_path(&self) -> PathBuf {
        Path::new(&self.data_root).join("containers").join("data")
    }
}

/// Parse the flat `key = value` root config file listing sibling cloud
/// endpoints (`cloud0 = host:port`, ...). One entry per line, blank
/// lines and `#`-prefixed comments skipped.
pub fn parse_cloud_list(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cloud_list_and_skips_comments() {
        let text = "# clouds\ncloud0 = 10.0.0.1:9001\n\ncloud1 = 10.0.0.2:9001\n";
        let clouds = parse_cloud_list(text);
        assert_eq!(clouds, vec![
            ("cloud0".to_string(), "10.0.0.1:9001".to_string()),
            ("cloud1".to_string(), "10.0.0.2:9001".to_string()),
        ]);
    }
}
