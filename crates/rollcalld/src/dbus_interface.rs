use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_core::key::validate_identifier;
use rollcall_core::{FsIdentityStore, IdentityKey, IdentityStore, RecognizeOutcome};
use zbus::interface;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the Rollcall daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    engine: EngineHandle,
    store: Arc<FsIdentityStore>,
    default_threshold: f32,
    model_dir: String,
    started_at: DateTime<Utc>,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, store: Arc<FsIdentityStore>, config: &Config) -> Self {
        Self {
            engine,
            store,
            default_threshold: config.match_threshold,
            model_dir: config.model_dir.display().to_string(),
            started_at: Utc::now(),
        }
    }

    /// Negative or NaN means "use the configured default".
    fn resolve_threshold(&self, requested: f64) -> f32 {
        if requested.is_finite() && requested >= 0.0 {
            requested.min(1.0) as f32
        } else {
            self.default_threshold
        }
    }

    async fn run_enroll(&self, identifier: &str, name: &str, image: Vec<u8>) -> (bool, String) {
        let key = match IdentityKey::new(identifier, name) {
            Ok(key) => key,
            Err(err) => {
                tracing::info!(identifier, error = %err, "enroll rejected");
                return (false, err.to_string());
            }
        };

        match self.engine.enroll(key, image).await {
            Ok(outcome) => (outcome.success(), outcome.message()),
            Err(err) => {
                tracing::error!(identifier, error = %err, "enroll failed");
                (false, err.to_string())
            }
        }
    }

    async fn run_recognize(&self, image: Vec<u8>, threshold: f64) -> (bool, String, f64, String) {
        let threshold = self.resolve_threshold(threshold);
        recognize_reply(self.engine.recognize(image, threshold).await)
    }

    async fn run_check_user(&self, identifier: &str) -> (bool, String) {
        if let Err(err) = validate_identifier(identifier.trim()) {
            return (false, err.to_string());
        }
        let identifier = identifier.trim().to_string();
        let store = Arc::clone(&self.store);

        let found = tokio::task::spawn_blocking(move || store.exists_by_identifier(&identifier)).await;
        match found {
            Ok(Ok(Some(key))) => (true, key.name().to_string()),
            Ok(Ok(None)) => (false, String::new()),
            Ok(Err(err)) => {
                tracing::error!(error = %err, "check_user: store lookup failed");
                (false, err.to_string())
            }
            Err(err) => {
                tracing::error!(error = %err, "check_user: lookup task failed");
                (false, err.to_string())
            }
        }
    }

    async fn identities_json(&self) -> Result<String, String> {
        let store = Arc::clone(&self.store);
        let keys = tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;

        let entries: Vec<_> = keys
            .iter()
            .map(|key| {
                serde_json::json!({
                    "key": key.to_string(),
                    "identifier": key.identifier(),
                    "name": key.name(),
                })
            })
            .collect();
        Ok(serde_json::Value::Array(entries).to_string())
    }

    async fn status_json(&self) -> String {
        let store = Arc::clone(&self.store);
        let identities = match tokio::task::spawn_blocking(move || store.list()).await {
            Ok(Ok(keys)) => serde_json::json!(keys.len()),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "status: could not count identities");
                serde_json::Value::Null
            }
            Err(_) => serde_json::Value::Null,
        };

        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "store_dir": self.store.root().display().to_string(),
            "model_dir": self.model_dir,
            "identities": identities,
            "match_threshold": self.default_threshold,
            "started_at": self.started_at.to_rfc3339(),
        })
        .to_string()
    }
}

/// Flatten a recognition outcome into the `(bsds)` reply.
fn recognize_reply(result: Result<RecognizeOutcome, EngineError>) -> (bool, String, f64, String) {
    match result {
        Ok(outcome) => {
            let identity = outcome.identity().map(ToString::to_string).unwrap_or_default();
            let score = outcome.score().map(f64::from).unwrap_or(f64::NAN);
            (outcome.identity().is_some(), identity, score, outcome.message())
        }
        Err(err) => {
            tracing::error!(error = %err, "recognize failed");
            (false, String::new(), f64::NAN, err.to_string())
        }
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Register a face under `identifier`, superseding any previous entry for it.
    async fn enroll(&self, identifier: &str, name: &str, image: Vec<u8>) -> (bool, String) {
        tracing::info!(identifier, name, bytes = image.len(), "enroll requested");
        self.run_enroll(identifier, name, image).await
    }

    /// Identify the face in `image`. Returns (matched, identity, score, message).
    async fn recognize(&self, image: Vec<u8>, threshold: f64) -> (bool, String, f64, String) {
        tracing::info!(bytes = image.len(), threshold, "recognize requested");
        self.run_recognize(image, threshold).await
    }

    /// Whether `identifier` is registered, and under which name.
    async fn check_user(&self, identifier: &str) -> (bool, String) {
        tracing::info!(identifier, "check_user requested");
        self.run_check_user(identifier).await
    }

    /// Registered identities as a JSON array.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        tracing::info!("list_identities requested");
        self.identities_json().await.map_err(zbus::fdo::Error::Failed)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().await)
    }
}
