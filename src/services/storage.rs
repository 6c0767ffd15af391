//! Byte-object storage over a single configured namespace.
//!
//! All three variants (local filesystem, GCS, Azure Blob) are driven through
//! the `object_store` crate behind one [`StorageBackend`] value, built once
//! at startup and injected into the job store and worker. URIs handed out by
//! `put` embed the variant: a bare absolute path for the local backend,
//! `gs://bucket/key` for GCS, `az://container/key` for Azure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};

use crate::config::{AppConfig, BackendKind};

/// Key prefix for uploaded inputs.
pub const INPUT_PREFIX: &str = "input";
/// Key prefix for transform outputs.
pub const OUTPUT_PREFIX: &str = "output";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("URI does not belong to this backend: {0}")]
    InvalidUri(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage authentication failed: {0}")]
    Auth(String),

    #[error("conditional write lost a race on {0}")]
    VersionConflict(String),

    #[error("storage operation failed: {0}")]
    ObjectStore(#[source] object_store::Error),

    #[error("local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

fn map_err(target: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::ObjectNotFound(target.to_string()),
        object_store::Error::Precondition { .. } | object_store::Error::AlreadyExists { .. } => {
            StorageError::VersionConflict(target.to_string())
        }
        object_store::Error::Unauthenticated { .. }
        | object_store::Error::PermissionDenied { .. } => StorageError::Auth(err.to_string()),
        other => StorageError::ObjectStore(other),
    }
}

/// Maps logical object keys to the URIs this deployment hands out, and back.
#[derive(Debug, Clone)]
enum UriStyle {
    /// Absolute filesystem paths under a root directory.
    Path { root: PathBuf },
    /// `scheme://container/key` object URIs.
    Object {
        scheme: &'static str,
        container: String,
    },
}

impl UriStyle {
    fn format(&self, key: &str) -> String {
        match self {
            UriStyle::Path { root } => root.join(key).display().to_string(),
            UriStyle::Object { scheme, container } => format!("{scheme}://{container}/{key}"),
        }
    }

    fn parse(&self, uri: &str) -> Result<ObjectPath, StorageError> {
        let key = match self {
            UriStyle::Path { root } => {
                if uri.contains("://") {
                    return Err(StorageError::InvalidUri(uri.to_string()));
                }
                Path::new(uri)
                    .strip_prefix(root)
                    .ok()
                    .and_then(|rel| rel.to_str())
                    .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?
            }
            UriStyle::Object { scheme, container } => {
                let prefix = format!("{scheme}://{container}/");
                uri.strip_prefix(&prefix)
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?
            }
        };
        ObjectPath::parse(key).map_err(|_| StorageError::InvalidUri(uri.to_string()))
    }
}

/// The pluggable byte-object storage capability.
///
/// Exactly one backend is active per process. Operations take and return the
/// URIs produced by [`StorageBackend::put`]; a URI minted by a differently
/// configured backend is rejected with [`StorageError::InvalidUri`].
pub struct StorageBackend {
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    uris: UriStyle,
}

impl StorageBackend {
    /// Build the backend selected by configuration. Construction failures
    /// (missing directory, bad credentials shape) are fatal to the process.
    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        match config.storage_backend {
            BackendKind::Local => Self::local(&config.local_data_dir),
            BackendKind::Gcs => Self::gcs(config),
            BackendKind::Azure => Self::azure(config),
        }
    }

    /// Local filesystem backend rooted at `root` (created if absent).
    pub fn local(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root)?;
        let root = root
            .canonicalize()
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", root.display())))?;
        let store = LocalFileSystem::new_with_prefix(&root)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self {
            kind: BackendKind::Local,
            store: Arc::new(store),
            uris: UriStyle::Path { root },
        })
    }

    fn gcs(config: &AppConfig) -> Result<Self, StorageError> {
        let bucket = config
            .gcs_bucket
            .clone()
            .ok_or_else(|| StorageError::Unavailable("gcs backend without bucket".into()))?;
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&bucket);
        if let Some(key_path) = &config.gcs_service_account {
            builder = builder.with_service_account_path(key_path.display().to_string());
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self {
            kind: BackendKind::Gcs,
            store: Arc::new(store),
            uris: UriStyle::Object {
                scheme: "gs",
                container: bucket,
            },
        })
    }

    fn azure(config: &AppConfig) -> Result<Self, StorageError> {
        let container = config
            .azure_container
            .clone()
            .ok_or_else(|| StorageError::Unavailable("azure backend without container".into()))?;
        let mut builder = MicrosoftAzureBuilder::from_env().with_container_name(&container);
        if let Some(account) = &config.azure_account {
            builder = builder.with_account(account);
        }
        if let Some(key) = &config.azure_access_key {
            builder = builder.with_access_key(key);
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self {
            kind: BackendKind::Azure,
            store: Arc::new(store),
            uris: UriStyle::Object {
                scheme: "az",
                container,
            },
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Startup probe for the configured namespace.
    ///
    /// The local root is created at construction time. Remote buckets and
    /// containers cannot be created through this API, so they must already
    /// exist; one list call confirms that (and the credentials) before the
    /// process starts serving, instead of a generic storage error on first
    /// use.
    pub async fn ensure_ready(&self) -> Result<(), StorageError> {
        match self.kind {
            BackendKind::Local => Ok(()),
            BackendKind::Gcs | BackendKind::Azure => {
                self.store
                    .list_with_delimiter(None)
                    .await
                    .map_err(|e| match e {
                        object_store::Error::NotFound { .. } => StorageError::Unavailable(
                            format!("configured namespace does not exist: {}", self.uris.format("")),
                        ),
                        other => map_err("namespace probe", other),
                    })?;
                Ok(())
            }
        }
    }

    /// The URI `put(key, ..)` would return, without writing anything.
    pub fn uri_for(&self, key: &str) -> String {
        self.uris.format(key)
    }

    /// Write `bytes` under `key` within the backend namespace and return the
    /// resolvable URI for the stored object. Overwrites an existing object,
    /// which is the retry/idempotence path for per-job outputs.
    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<String, StorageError> {
        let path = ObjectPath::parse(key).map_err(|_| StorageError::InvalidUri(key.to_string()))?;
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(self.uris.format(key))
    }

    /// Fetch the object behind a URI produced by [`StorageBackend::put`].
    pub async fn get(&self, uri: &str) -> Result<Bytes, StorageError> {
        let path = self.uris.parse(uri)?;
        let result = self.store.get(&path).await.map_err(|e| map_err(uri, e))?;
        result.bytes().await.map_err(|e| map_err(uri, e))
    }

    /// Fetch an object into a local file, for transforms that work on paths.
    pub async fn fetch_to_path(&self, uri: &str, dest: &Path) -> Result<(), StorageError> {
        let bytes = self.get(uri).await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    pub async fn exists(&self, uri: &str) -> Result<bool, StorageError> {
        let path = self.uris.parse(uri)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_err(uri, e)),
        }
    }

    /// Read an object together with its entity-tag version, for
    /// read-modify-write cycles. `None` when the object does not exist yet.
    pub async fn load_versioned(
        &self,
        key: &str,
    ) -> Result<Option<(Bytes, UpdateVersion)>, StorageError> {
        let path = ObjectPath::parse(key).map_err(|_| StorageError::InvalidUri(key.to_string()))?;
        match self.store.get(&path).await {
            Ok(result) => {
                let version = UpdateVersion {
                    e_tag: result.meta.e_tag.clone(),
                    version: result.meta.version.clone(),
                };
                let bytes = result.bytes().await.map_err(|e| map_err(key, e))?;
                Ok(Some((bytes, version)))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_err(key, e)),
        }
    }

    /// Conditional write: succeeds only if the object still carries
    /// `expected` (or still does not exist, when `expected` is `None`).
    /// A lost race surfaces as [`StorageError::VersionConflict`].
    ///
    /// `LocalFileSystem` has no etag-conditional overwrite, so the local
    /// variant compares the current etag itself before a plain put. Callers
    /// within one process serialize through the job store's writer lock;
    /// the remote variants get a true conditional write from the provider.
    pub async fn put_versioned(
        &self,
        key: &str,
        bytes: Bytes,
        expected: Option<UpdateVersion>,
    ) -> Result<(), StorageError> {
        let path = ObjectPath::parse(key).map_err(|_| StorageError::InvalidUri(key.to_string()))?;
        let payload = PutPayload::from(bytes);
        match expected {
            None => {
                self.store
                    .put_opts(&path, payload, PutOptions::from(PutMode::Create))
                    .await
                    .map_err(|e| map_err(key, e))?;
            }
            Some(version) if self.kind == BackendKind::Local => {
                let meta = match self.store.head(&path).await {
                    Ok(meta) => meta,
                    // Expected a versioned object that is gone: someone won.
                    Err(object_store::Error::NotFound { .. }) => {
                        return Err(StorageError::VersionConflict(key.to_string()))
                    }
                    Err(e) => return Err(map_err(key, e)),
                };
                if meta.e_tag != version.e_tag {
                    return Err(StorageError::VersionConflict(key.to_string()));
                }
                self.store
                    .put(&path, payload)
                    .await
                    .map_err(|e| map_err(key, e))?;
            }
            Some(version) => {
                self.store
                    .put_opts(&path, payload, PutOptions::from(PutMode::Update(version)))
                    .await
                    .map_err(|e| map_err(key, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_style_round_trips_keys() {
        let style = UriStyle::Path {
            root: PathBuf::from("/srv/graymill"),
        };
        let uri = style.format("input/a.png");
        assert_eq!(uri, "/srv/graymill/input/a.png");
        assert_eq!(style.parse(&uri).unwrap().as_ref(), "input/a.png");
    }

    #[test]
    fn object_styles_embed_scheme_and_container() {
        let gcs = UriStyle::Object {
            scheme: "gs",
            container: "uploads".to_string(),
        };
        let azure = UriStyle::Object {
            scheme: "az",
            container: "uploads".to_string(),
        };
        assert_eq!(gcs.format("input/a.png"), "gs://uploads/input/a.png");
        assert_eq!(azure.format("input/a.png"), "az://uploads/input/a.png");
        assert_eq!(
            gcs.parse("gs://uploads/input/a.png").unwrap().as_ref(),
            "input/a.png"
        );
    }

    #[test]
    fn foreign_uris_are_rejected() {
        let gcs = UriStyle::Object {
            scheme: "gs",
            container: "uploads".to_string(),
        };
        assert!(matches!(
            gcs.parse("az://uploads/input/a.png"),
            Err(StorageError::InvalidUri(_))
        ));
        assert!(matches!(
            gcs.parse("gs://other-bucket/input/a.png"),
            Err(StorageError::InvalidUri(_))
        ));
        assert!(matches!(
            gcs.parse("gs://uploads/"),
            Err(StorageError::InvalidUri(_))
        ));

        let local = UriStyle::Path {
            root: PathBuf::from("/srv/graymill"),
        };
        assert!(matches!(
            local.parse("gs://uploads/input/a.png"),
            Err(StorageError::InvalidUri(_))
        ));
        assert!(matches!(
            local.parse("/etc/passwd"),
            Err(StorageError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn local_put_get_exists_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local(dir.path()).unwrap();

        let uri = backend
            .put("input/a.bin", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert!(uri.starts_with(dir.path().canonicalize().unwrap().to_str().unwrap()));

        assert!(backend.exists(&uri).await.unwrap());
        assert_eq!(backend.get(&uri).await.unwrap().as_ref(), b"payload");

        let missing = backend.uri_for("input/missing.bin");
        assert!(!backend.exists(&missing).await.unwrap());
        assert!(matches!(
            backend.get(&missing).await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }

    /// The registry aggregate is rewritten on every mutation, so the local
    /// variant must sustain an arbitrary chain of versioned overwrites.
    #[tokio::test]
    async fn versioned_overwrites_chain_on_local_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local(dir.path()).unwrap();

        backend
            .put_versioned("jobs/jobs.json", Bytes::from_static(b"[]"), None)
            .await
            .unwrap();
        for payload in [&b"[1]"[..], b"[1,2]", b"[1,2,3]"] {
            let (_, version) = backend
                .load_versioned("jobs/jobs.json")
                .await
                .unwrap()
                .unwrap();
            backend
                .put_versioned("jobs/jobs.json", Bytes::copy_from_slice(payload), Some(version))
                .await
                .unwrap();
        }
        let (bytes, _) = backend
            .load_versioned("jobs/jobs.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes.as_ref(), b"[1,2,3]");
    }

    #[tokio::test]
    async fn local_backend_is_ready_after_construction() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local(dir.path()).unwrap();
        backend.ensure_ready().await.unwrap();
    }

    #[tokio::test]
    async fn conditional_put_detects_lost_race() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local(dir.path()).unwrap();

        backend
            .put_versioned("jobs/jobs.json", Bytes::from_static(b"[]"), None)
            .await
            .unwrap();

        // Creating again without a version must fail.
        assert!(matches!(
            backend
                .put_versioned("jobs/jobs.json", Bytes::from_static(b"[]"), None)
                .await,
            Err(StorageError::VersionConflict(_))
        ));

        let (bytes, version) = backend
            .load_versioned("jobs/jobs.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes.as_ref(), b"[]");

        // A writer holding the current version wins...
        backend
            .put_versioned("jobs/jobs.json", Bytes::from_static(b"[1]"), Some(version.clone()))
            .await
            .unwrap();

        // ...and the stale version now loses.
        assert!(matches!(
            backend
                .put_versioned("jobs/jobs.json", Bytes::from_static(b"[2]"), Some(version))
                .await,
            Err(StorageError::VersionConflict(_))
        ));
    }
}
