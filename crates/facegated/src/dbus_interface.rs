use std::path::PathBuf;
use std::sync::Arc;

use facegate_core::verification::require_probe;
use facegate_core::{EnrollmentFields, FaceGateError, FaceGateResult, IdentityService};
use zbus::{fdo, interface};

use crate::engine::{EngineError, EngineHandle};

pub const BUS_NAME: &str = "org.facegate.Identity1";
pub const OBJECT_PATH: &str = "/org/facegate/Identity1";

/// D-Bus interface for the facegate identity daemon.
///
/// Bus name: org.facegate.Identity1
/// Object path: /org/facegate/Identity1
pub struct IdentityInterface {
    service: Arc<IdentityService>,
    engine: EngineHandle,
    store_path: PathBuf,
}

impl IdentityInterface {
    pub fn new(service: Arc<IdentityService>, engine: EngineHandle, store_path: PathBuf) -> Self {
        Self {
            service,
            engine,
            store_path,
        }
    }

    /// Run a store operation on the blocking pool. Store locks are held
    /// across the fsync of a save, so they are never taken on a runtime worker.
    async fn with_service<T, F>(&self, op: &'static str, f: F) -> fdo::Result<T>
    where
        F: FnOnce(&IdentityService) -> FaceGateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| fdo::Error::Failed(format!("{op} task failed: {e}")))?
            .map_err(to_fdo)
    }
}

#[interface(name = "org.facegate.Identity1")]
impl IdentityInterface {
    /// Enroll a new identity from the face in `image_path`. Returns the identity key.
    async fn enroll(
        &self,
        identity_key: &str,
        display_name: &str,
        phone: &str,
        address: &str,
        image_path: &str,
    ) -> fdo::Result<String> {
        tracing::info!(identity_key, "enroll requested");
        let fields = EnrollmentFields {
            identity_key: identity_key.to_string(),
            display_name: display_name.to_string(),
            phone: phone.to_string(),
            address: address.to_string(),
        };
        let image = image_arg(image_path);

        let checked = fields.clone();
        let image_path = self
            .with_service("enrollment", move |service| {
                service.begin_enrollment(&checked, image.as_ref()).cloned()
            })
            .await?;
        let faces = self.engine.extract(image_path).await.map_err(engine_to_fdo)?;

        let outcome = self
            .with_service("enrollment", move |service| service.complete_enrollment(&fields, faces))
            .await?;
        Ok(outcome.identity_key)
    }

    /// Verify the face in `image_path` against every enrolled identity.
    ///
    /// Returns a JSON object: `{matched, identity_key, confidence, distance, identity}`.
    async fn verify(&self, image_path: &str) -> fdo::Result<String> {
        tracing::info!(image_path, "verify requested");
        self.with_service("verification", |service| service.begin_verification())
            .await?;
        let image = image_arg(image_path);
        let image_path = require_probe(image.as_ref()).map_err(to_fdo)?.clone();

        let faces = self.engine.extract(image_path).await.map_err(engine_to_fdo)?;
        let outcome = self
            .with_service("verification", move |service| service.complete_verification(faces))
            .await?;

        serde_json::to_string(&outcome).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Enrolled identities as a JSON array, in enrollment order.
    async fn list_identities(&self) -> fdo::Result<String> {
        tracing::debug!("list_identities requested");
        let identities = self
            .with_service("list", |service| Ok(service.list_identities()))
            .await?;
        serde_json::to_string(&identities).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Remove an enrolled identity.
    async fn delete_identity(&self, identity_key: &str) -> fdo::Result<bool> {
        tracing::info!(identity_key, "delete_identity requested");
        let key = identity_key.to_string();
        self.with_service("delete", move |service| service.delete_identity(&key))
            .await?;
        Ok(true)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let identities = self.with_service("status", |service| Ok(service.len())).await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": identities,
            "match_threshold": self.service.threshold(),
            "match_policy": self.service.matcher().policy().to_string(),
            "store_path": self.store_path.display().to_string(),
        })
        .to_string())
    }
}

fn image_arg(image_path: &str) -> Option<PathBuf> {
    let trimmed = image_path.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn to_fdo(err: FaceGateError) -> fdo::Error {
    if err.is_user_correctable() {
        fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::error!(error = %err, "operation failed");
        fdo::Error::Failed(err.to_string())
    }
}

fn engine_to_fdo(err: EngineError) -> fdo::Error {
    if err.is_user_correctable() {
        tracing::info!(reason = %err, "rejected probe image");
        fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::error!(error = %err, "face extraction failed");
        fdo::Error::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use facegate_core::{
        BoundingBox, DetectedFace, Embedding, EmbeddingExtractor, EuclideanMatcher,
        ExtractorError, IdentityRegistry, StoreFile,
    };
    use image::RgbImage;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Faces keyed off the image width: width 1 → no face, width 2 → two faces,
    /// otherwise one face at `[width / 100, 0]`.
    struct WidthExtractor;

    impl EmbeddingExtractor for WidthExtractor {
        fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
            let face = |x: f32| DetectedFace {
                bounding_box: BoundingBox { left: 0, top: 0, right: 1, bottom: 1 },
                embedding: Embedding::new(vec![x, 0.0]),
            };
            Ok(match image.width() {
                1 => vec![],
                2 => vec![face(0.0), face(1.0)],
                w => vec![face(w as f32 / 100.0)],
            })
        }
    }

    fn png(tmp: &TempDir, width: u32) -> String {
        let path = tmp.path().join(format!("w{width}.png"));
        RgbImage::new(width, 2).save(&path).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn interface(tmp: &TempDir) -> IdentityInterface {
        let store_path = tmp.path().join("identities.fgid");
        let registry = IdentityRegistry::open(StoreFile::new(&store_path)).unwrap();
        let service = Arc::new(IdentityService::new(registry, EuclideanMatcher::default(), 0.6));
        let engine = spawn_engine(WidthExtractor, Duration::from_secs(5)).unwrap();
        IdentityInterface::new(service, engine, store_path)
    }

    #[tokio::test]
    async fn test_enroll_verify_list_delete() {
        let tmp = TempDir::new().unwrap();
        let iface = interface(&tmp);

        let key = iface
            .enroll("ada@x.io", "Ada", "555", "1 Loop Rd", &png(&tmp, 30))
            .await
            .unwrap();
        assert_eq!(key, "ada@x.io");

        let json = iface.verify(&png(&tmp, 40)).await.unwrap();
        let outcome: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome["matched"], true);
        assert_eq!(outcome["identity"]["display_name"], "Ada");

        let listed: serde_json::Value =
            serde_json::from_str(&iface.list_identities().await.unwrap()).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert!(listed[0].get("embedding").is_none());

        assert!(iface.delete_identity("ada@x.io").await.unwrap());
        let status: serde_json::Value = serde_json::from_str(&iface.status().await.unwrap()).unwrap();
        assert_eq!(status["identities"], 0);
        assert_eq!(status["match_policy"], "nearest");
    }

    #[tokio::test]
    async fn test_user_errors_are_invalid_args() {
        let tmp = TempDir::new().unwrap();
        let iface = interface(&tmp);

        let err = iface.verify(&png(&tmp, 30)).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(ref m) if m.contains("no identities")));

        let err = iface.enroll("ada@x.io", "Ada", "", "", &png(&tmp, 1)).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(ref m) if m.contains("no face")));

        let err = iface.enroll("ada@x.io", "Ada", "", "", &png(&tmp, 2)).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(ref m) if m.contains("2 faces")));

        let err = iface.enroll("ada@x.io", "", "", "", &png(&tmp, 30)).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(ref m) if m.contains("display_name")));

        let err = iface.enroll("ada@x.io", "Ada", "", "", "  ").await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(ref m) if m.contains("image")));

        let err = iface.delete_identity("ghost@x.io").await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_reads_during_delete_on_single_worker() {
        let tmp = TempDir::new().unwrap();
        let iface = interface(&tmp);
        iface.enroll("ada@x.io", "Ada", "", "", &png(&tmp, 30)).await.unwrap();
        iface.enroll("bob@x.io", "Bob", "", "", &png(&tmp, 90)).await.unwrap();

        let probe = png(&tmp, 31);
        let (verified, listed, status, deleted) = tokio::join!(
            iface.verify(&probe),
            iface.list_identities(),
            iface.status(),
            iface.delete_identity("bob@x.io"),
        );

        let outcome: serde_json::Value = serde_json::from_str(&verified.unwrap()).unwrap();
        assert_eq!(outcome["identity_key"], "ada@x.io");
        let listed: serde_json::Value = serde_json::from_str(&listed.unwrap()).unwrap();
        assert!(matches!(listed.as_array().map(Vec::len), Some(1 | 2)));
        let status: serde_json::Value = serde_json::from_str(&status.unwrap()).unwrap();
        assert!(matches!(status["identities"].as_u64(), Some(1 | 2)));
        assert!(deleted.unwrap());

        let listed: serde_json::Value =
            serde_json::from_str(&iface.list_identities().await.unwrap()).unwrap();
        assert_eq!(listed[0]["identity_key"], "ada@x.io");
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_image_path() {
        let tmp = TempDir::new().unwrap();
        let iface = interface(&tmp);
        let missing = tmp.path().join("missing.png");
        let err = iface
            .enroll("ada@x.io", "Ada", "", "", &missing.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));
    }
}
