//! celeb-config: settings shared by the daemon and the CLI.
//!
//! Resolves artifact locations and the Gemini credential from a TOML file
//! and `CELEB_*` environment variables.

use celeb_core::ArtifactPaths;
use celeb_summary::GeminiConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Service configuration.
///
/// Built from defaults, then the TOML file named by `CELEB_CONFIG`, then
/// `CELEB_*` / `GEMINI_API_KEY` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind_addr: String,
    /// Directory holding the model and class dictionary.
    pub artifact_dir: PathBuf,
    /// Classifier model; defaults to `<artifact_dir>/saved_model.onnx`.
    pub model_path: Option<PathBuf>,
    /// Name→index JSON; defaults to `<artifact_dir>/class_dictionary.json`.
    pub class_dictionary: Option<PathBuf>,
    /// Directory holding the Haar cascades.
    pub cascade_dir: PathBuf,
    pub face_cascade: Option<PathBuf>,
    pub eye_cascade: Option<PathBuf>,
    /// Gemini credential. Summaries fall back to fixed text when unset.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub summary_timeout_secs: u64,
    /// Pending classification requests before HTTP handlers wait.
    pub engine_queue: usize,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            artifact_dir: PathBuf::from("./artifacts"),
            model_path: None,
            class_dictionary: None,
            cascade_dir: PathBuf::from("./opencv/haarcascades"),
            face_cascade: None,
            eye_cascade: None,
            gemini_api_key: None,
            gemini_model: celeb_summary::gemini::DEFAULT_MODEL.to_string(),
            gemini_base_url: celeb_summary::gemini::DEFAULT_BASE_URL.to_string(),
            summary_timeout_secs: 20,
            engine_queue: 16,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("CELEB_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CELEB_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("CELEB_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CELEB_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CELEB_CLASS_DICTIONARY") {
            self.class_dictionary = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CELEB_CASCADE_DIR") {
            self.cascade_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CELEB_FACE_CASCADE") {
            self.face_cascade = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CELEB_EYE_CASCADE") {
            self.eye_cascade = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = lookup("CELEB_GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = lookup("CELEB_GEMINI_BASE_URL") {
            self.gemini_base_url = v;
        }
        self.summary_timeout_secs = env_u64(lookup, "CELEB_SUMMARY_TIMEOUT_SECS", self.summary_timeout_secs);
        self.engine_queue = env_usize(lookup, "CELEB_ENGINE_QUEUE", self.engine_queue);
        self.max_body_bytes = env_usize(lookup, "CELEB_MAX_BODY_BYTES", self.max_body_bytes);
    }

    /// Resolved locations of the four startup artifacts.
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            face_cascade: self
                .face_cascade
                .clone()
                .unwrap_or_else(|| self.cascade_dir.join("haarcascade_frontalface_default.xml")),
            eye_cascade: self
                .eye_cascade
                .clone()
                .unwrap_or_else(|| self.cascade_dir.join("haarcascade_eye.xml")),
            model: self
                .model_path
                .clone()
                .unwrap_or_else(|| self.artifact_dir.join("saved_model.onnx")),
            class_dictionary: self
                .class_dictionary
                .clone()
                .unwrap_or_else(|| self.artifact_dir.join("class_dictionary.json")),
        }
    }

    /// Gemini settings, or `None` when no usable key is configured.
    pub fn gemini_config(&self) -> Option<GeminiConfig> {
        let key = self.gemini_api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        Some(GeminiConfig {
            api_key: key.to_string(),
            model: self.gemini_model.clone(),
            base_url: self.gemini_base_url.clone(),
            timeout: Duration::from_secs(self.summary_timeout_secs),
        })
    }
}

fn env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    parse_or(lookup, key, default)
}

fn env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    parse_or(lookup, key, default)
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.bind_addr, "127.0.0.1:5000");

        let paths = cfg.artifact_paths();
        assert_eq!(paths.model, PathBuf::from("./artifacts/saved_model.onnx"));
        assert_eq!(paths.class_dictionary, PathBuf::from("./artifacts/class_dictionary.json"));
        assert_eq!(
            paths.face_cascade,
            PathBuf::from("./opencv/haarcascades/haarcascade_frontalface_default.xml")
        );
        assert_eq!(paths.eye_cascade, PathBuf::from("./opencv/haarcascades/haarcascade_eye.xml"));
        assert!(cfg.gemini_config().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("CELEB_BIND_ADDR", "0.0.0.0:8080"),
            ("CELEB_ARTIFACT_DIR", "/srv/model"),
            ("CELEB_EYE_CASCADE", "/srv/eye.xml"),
            ("CELEB_ENGINE_QUEUE", "4"),
            ("GEMINI_API_KEY", "abc"),
            ("CELEB_SUMMARY_TIMEOUT_SECS", "7"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.engine_queue, 4);

        let paths = cfg.artifact_paths();
        assert_eq!(paths.model, PathBuf::from("/srv/model/saved_model.onnx"));
        assert_eq!(paths.eye_cascade, PathBuf::from("/srv/eye.xml"));

        let gemini = cfg.gemini_config().unwrap();
        assert_eq!(gemini.api_key, "abc");
        assert_eq!(gemini.model, "gemini-2.0-flash");
        assert_eq!(gemini.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_unparsable_number_keeps_default() {
        let cfg = Config::from_lookup(lookup(&[("CELEB_ENGINE_QUEUE", "lots")])).unwrap();
        assert_eq!(cfg.engine_queue, 16);
    }

    #[test]
    fn test_blank_api_key_disables_gemini() {
        let cfg = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "   ")])).unwrap();
        assert!(cfg.gemini_config().is_none());
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("celebd.toml");
        std::fs::write(
            &path,
            "bind_addr = \"127.0.0.1:6000\"\nmodel_path = \"/models/svm.onnx\"\nengine_queue = 2\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let cfg = Config::from_lookup(lookup(&[
            ("CELEB_CONFIG", path_str.as_str()),
            ("CELEB_ENGINE_QUEUE", "9"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:6000");
        assert_eq!(cfg.artifact_paths().model, PathBuf::from("/models/svm.onnx"));
        assert_eq!(cfg.engine_queue, 9);
    }

    #[test]
    fn test_bad_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("celebd.toml");
        std::fs::write(&path, "no_such_setting = 1\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();
        assert!(matches!(
            Config::from_lookup(lookup(&[("CELEB_CONFIG", path_str.as_str())])),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("CELEB_CONFIG", "/nonexistent/celebd.toml")])),
            Err(ConfigError::Io { .. })
        ));
    }
}
