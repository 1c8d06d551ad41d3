use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_SYNC_TIMEOUT_SECONDS: u64 = 30;

fn default_prefix() -> String {
    "/registry".to_string()
}

/// Arguments shared by the placement plugins.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementArgs {
    // Xline endpoints
    pub xline_config: XlineConfig,
    /// How long plugin construction waits for the policy cache to fill.
    pub sync_timeout_seconds: Option<u64>,
}

impl PlacementArgs {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds.unwrap_or(DEFAULT_SYNC_TIMEOUT_SECONDS))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct XlineConfig {
    pub endpoints: Vec<String>,
    /// Key prefix the policy objects are stored under.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub fn load_config(path: &str) -> Result<PlacementArgs> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: PlacementArgs =
        serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_config_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "xline_config:\n  endpoints:\n    - \"http://127.0.0.1:2379\""
        )
        .unwrap();

        let args = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(args.xline_config.endpoints, vec!["http://127.0.0.1:2379"]);
        assert_eq!(args.xline_config.prefix, "/registry");
        assert!(args.xline_config.username.is_none());
        assert_eq!(args.sync_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_config_full() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
xline_config:
  endpoints: ["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
  prefix: /kosmos
  username: root
  password: secret
sync_timeout_seconds: 5
"#
        )
        .unwrap();

        let args = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(args.xline_config.endpoints.len(), 2);
        assert_eq!(args.xline_config.prefix, "/kosmos");
        assert_eq!(args.xline_config.username.as_deref(), Some("root"));
        assert_eq!(args.sync_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/placement.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_load_config_rejects_bad_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sync_timeout_seconds: 5").unwrap();
        let err = load_config(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}
