use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::SwitchyardConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "switchyard.toml",
    "switchyard.yaml",
    "switchyard.yml",
    "switchyard.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<SwitchyardConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./switchyard.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/switchyard/switchyard.{toml,yaml,yml,json}` (user-global)
///
/// Returns `SwitchyardConfig::default()` if no config file is found or it fails to parse.
pub fn discover_and_load() -> SwitchyardConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SwitchyardConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/switchyard/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "switchyard").map(|d| d.config_dir().to_path_buf())
}

/// Parse raw config text, picking the format from the path's extension.
pub fn parse_config(raw: &str, path: &Path) -> Result<SwitchyardConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::unsupported_format(other)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::AdmissionMode};

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchyard.toml");
        std::fs::write(
            &path,
            "[dispatcher]\nitem_timeout_secs = 30\n\n[lanes.chat]\nmode = \"collect\"\nmax_batch_size = 3\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.dispatcher.item_timeout_secs, 30);
        assert_eq!(cfg.lanes["chat"].mode, AdmissionMode::Collect);
        assert_eq!(cfg.lanes["chat"].max_batch_size, 3);
    }

    #[test]
    fn loads_yaml_and_json() {
        let yaml = "lanes:\n  hooks:\n    concurrency: 2\n    mode: interrupt\n";
        let cfg = parse_config(yaml, Path::new("switchyard.yaml")).unwrap();
        assert_eq!(cfg.lanes["hooks"].mode, AdmissionMode::Interrupt);
        assert_eq!(cfg.lanes["hooks"].concurrency, 2);

        let json = r#"{"lanes": {"webhooks": {"mode": "steer", "collect_window_ms": 200}}}"#;
        let cfg = parse_config(json, Path::new("switchyard.json")).unwrap();
        assert_eq!(cfg.lanes["webhooks"].collect_window_ms, 200);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse_config("", Path::new("switchyard.ini")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/switchyard.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/switchyard.toml"));
    }
}
