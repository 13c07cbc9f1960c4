use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sweep_runner::ToolPaths;

/// Process-wide locations, resolved once and handed to the store and the
/// executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub tools: ToolPaths,
}

/// One source of settings: a settings file or the command line. Every field
/// is optional; present fields replace what earlier layers set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsLayer {
    pub db_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub gradle: Option<PathBuf>,
    pub beam_dir: Option<PathBuf>,
    pub results_js: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".sweep").join("series.db"),
            output_dir: PathBuf::from(".sweep").join("results"),
            tools: ToolPaths {
                gradle: PathBuf::from("gradlew"),
                beam_dir: PathBuf::from("."),
                results_js: std::env::temp_dir().join("flink-jsfile.js"),
            },
        }
    }
}

impl Settings {
    /// Defaults, then `settings_file` if given, then `flags`.
    pub fn resolve(settings_file: Option<&Path>, flags: SettingsLayer) -> Result<Self> {
        let mut settings = Settings::default();
        if let Some(path) = settings_file {
            settings.apply(load_settings_file(path)?);
        }
        settings.apply(flags);
        Ok(settings)
    }

    fn apply(&mut self, layer: SettingsLayer) {
        if let Some(v) = layer.db_path {
            self.db_path = v;
        }
        if let Some(v) = layer.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = layer.gradle {
            self.tools.gradle = v;
        }
        if let Some(v) = layer.beam_dir {
            self.tools.beam_dir = v;
        }
        if let Some(v) = layer.results_js {
            self.tools.results_js = v;
        }
    }
}

fn load_settings_file(path: &Path) -> Result<SettingsLayer> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let parsed: SettingsLayer = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&raw)?
    } else {
        serde_yaml::from_str(&raw)?
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "sweep_settings_{}_{}_{}",
            label,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn flags_override_file_which_overrides_defaults() {
        let dir = temp_dir("layers");
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("settings.yaml");
        fs::write(
            &path,
            "db_path: /data/sweeps.db\ngradle: /opt/beam/gradlew\nbeam_dir: /opt/beam\n",
        )
        .expect("write settings");

        let flags = SettingsLayer {
            beam_dir: Some(PathBuf::from("/src/beam")),
            ..SettingsLayer::default()
        };
        let settings = Settings::resolve(Some(&path), flags).expect("resolve");
        assert_eq!(settings.db_path, PathBuf::from("/data/sweeps.db"));
        assert_eq!(settings.tools.gradle, PathBuf::from("/opt/beam/gradlew"));
        assert_eq!(settings.tools.beam_dir, PathBuf::from("/src/beam"));
        assert_eq!(settings.output_dir, Settings::default().output_dir);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_settings_keys_are_rejected() {
        let dir = temp_dir("unknown_keys");
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("settings.json");
        fs::write(&path, r#"{"db": "x.db"}"#).expect("write settings");
        assert!(Settings::resolve(Some(&path), SettingsLayer::default()).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
