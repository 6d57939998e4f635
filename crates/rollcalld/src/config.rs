use rollcall_core::{DEFAULT_MATCH_THRESHOLD, DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Optional TOML config file; every field may be overridden by the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    model_dir: Option<PathBuf>,
    store_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    intra_threads: Option<usize>,
    bus: Option<BusKind>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Identity store directory (embeddings + `images/`).
    pub store_dir: PathBuf,
    /// Cosine similarity a probe must reach to count as a match.
    pub match_threshold: f32,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load from the optional TOML file, then apply `ROLLCALL_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let file = match config_file_path(&env) {
            Some((path, required)) => read_config_file(&path, required)?,
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file, env))
    }

    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = env("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let store_dir = env("ROLLCALL_STORE_DIR")
            .map(PathBuf::from)
            .or(file.store_dir)
            .unwrap_or_else(|| data_dir.join("faces"));

        let env_threshold = parse_env(&env, "ROLLCALL_MATCH_THRESHOLD");
        let match_threshold = accept(env_threshold, "ROLLCALL_MATCH_THRESHOLD", valid_threshold)
            .or_else(|| accept(file.match_threshold, "match_threshold", valid_threshold))
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);

        let positive = |n: usize| n > 0;
        let env_threads = parse_env(&env, "ROLLCALL_INTRA_THREADS");
        let intra_threads = accept(env_threads, "ROLLCALL_INTRA_THREADS", positive)
            .or_else(|| accept(file.intra_threads, "intra_threads", positive))
            .unwrap_or(DEFAULT_INTRA_THREADS);

        let bus = match env("ROLLCALL_BUS").as_deref() {
            Some("system") => BusKind::System,
            Some("session") => BusKind::Session,
            Some(other) => {
                tracing::warn!(value = other, "ROLLCALL_BUS must be 'session' or 'system'; using session");
                BusKind::Session
            }
            None => file.bus.unwrap_or(BusKind::Session),
        };

        Self {
            model_dir,
            store_dir,
            match_threshold,
            intra_threads,
            bus,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(RECOGNIZER_MODEL_FILE)
    }
}

/// A usable threshold is a finite cosine similarity.
pub fn valid_threshold(t: f32) -> bool {
    t.is_finite() && (-1.0..=1.0).contains(&t)
}

/// `ROLLCALL_CONFIG` names a file that must exist; otherwise the XDG location
/// is used only if present.
fn config_file_path(env: &impl Fn(&str) -> Option<String>) -> Option<(PathBuf, bool)> {
    if let Some(explicit) = env("ROLLCALL_CONFIG") {
        return Some((PathBuf::from(explicit), true));
    }
    let config_home = env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    let path = config_home.join("rollcall/config.toml");
    path.exists().then_some((path, false))
}

fn read_config_file(path: &Path, required: bool) -> Result<ConfigFile, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ConfigFile::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let file = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

/// Drop a value that parsed but is out of range, so the next source applies.
fn accept<T: Copy + std::fmt::Display>(value: Option<T>, source: &str, valid: impl Fn(T) -> bool) -> Option<T> {
    value.filter(|v| {
        let ok = valid(*v);
        if !ok {
            tracing::warn!(source, value = %v, "ignoring out-of-range setting");
        }
        ok
    })
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(ConfigFile::default(), env_from(&[("HOME", "/home/u")]));
        assert_eq!(config.store_dir, PathBuf::from("/home/u/.local/share/rollcall/faces"));
        assert_eq!(config.model_dir, PathBuf::from("/home/u/.local/share/rollcall/models"));
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.intra_threads, DEFAULT_INTRA_THREADS);
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(
            config.detector_model_path(),
            PathBuf::from("/home/u/.local/share/rollcall/models/det_10g.onnx")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            store_dir = "/srv/faces"
            match_threshold = 0.7
            bus = "system"
            "#,
        )
        .unwrap();
        let env = env_from(&[
            ("XDG_DATA_HOME", "/data"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.8"),
            ("ROLLCALL_MODEL_DIR", "/opt/models"),
        ]);

        let config = Config::resolve(file, env);
        assert_eq!(config.store_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.match_threshold, 0.8);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let env = env_from(&[
            ("HOME", "/h"),
            ("ROLLCALL_MATCH_THRESHOLD", "high"),
            ("ROLLCALL_INTRA_THREADS", "0"),
            ("ROLLCALL_BUS", "bogus"),
        ]);
        let config = Config::resolve(ConfigFile::default(), env);
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.intra_threads, DEFAULT_INTRA_THREADS);
        assert_eq!(config.bus, BusKind::Session);

        let out_of_range = env_from(&[("HOME", "/h"), ("ROLLCALL_MATCH_THRESHOLD", "1.5")]);
        let config = Config::resolve(ConfigFile::default(), out_of_range);
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_out_of_range_env_falls_back_to_file() {
        let file: ConfigFile = toml::from_str("match_threshold = 0.7\nintra_threads = 3\n").unwrap();
        let env = env_from(&[
            ("HOME", "/h"),
            ("ROLLCALL_MATCH_THRESHOLD", "1.5"),
            ("ROLLCALL_INTRA_THREADS", "0"),
        ]);
        let config = Config::resolve(file, env);
        assert_eq!(config.match_threshold, 0.7);
        assert_eq!(config.intra_threads, 3);
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        assert!(toml::from_str::<ConfigFile>("camera_device = \"/dev/video0\"").is_err());
    }

    #[test]
    fn test_explicit_config_file_must_exist() {
        let env = env_from(&[("ROLLCALL_CONFIG", "/nonexistent/rollcall.toml")]);
        let (path, required) = config_file_path(&env).unwrap();
        assert!(required);
        assert!(matches!(read_config_file(&path, required), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_read_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "intra_threads = 4\nmodel_dir = \"/m\"\n").unwrap();

        let file = read_config_file(&path, true).unwrap();
        assert_eq!(file.intra_threads, Some(4));
        assert_eq!(file.model_dir, Some(PathBuf::from("/m")));

        std::fs::write(&path, "intra_threads = \"many\"\n").unwrap();
        assert!(matches!(read_config_file(&path, true), Err(ConfigError::Parse { .. })));
    }
}
