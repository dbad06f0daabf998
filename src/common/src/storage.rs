use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::config::{ConfigError, EnvironmentConfig, StoreConfig};
use crate::document::{DocumentStore, ObjectDocumentStore};
use crate::table::{ObjectTableStore, TableStore};

/// Both stores of one environment, shared process-wide.
#[derive(Debug, Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentStore>,
    pub tables: Arc<dyn TableStore>,
}

impl Stores {
    /// Open the stores described by an environment configuration.
    pub fn open(environment: &EnvironmentConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            documents: open_document_store(&environment.documents)?,
            tables: open_table_store(&environment.tables)?,
        })
    }

    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        Self {
            documents: Arc::new(ObjectDocumentStore::new(object_store.clone(), "rowkeeper")),
            tables: Arc::new(ObjectTableStore::new(object_store, "rowkeeper")),
        }
    }
}

/// Open a table store from configuration
pub fn open_table_store(config: &StoreConfig) -> Result<Arc<dyn TableStore>, ConfigError> {
    let object_store = create_object_store_from_dsn(&config.dsn)?;
    Ok(Arc::new(ObjectTableStore::new(object_store, &config.prefix)))
}

/// Open a document store from configuration
pub fn open_document_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, ConfigError> {
    let object_store = create_object_store_from_dsn(&config.dsn)?;
    Ok(Arc::new(ObjectDocumentStore::new(
        object_store,
        &config.prefix,
    )))
}

/// Check that a DSN parses and uses a supported scheme
pub fn validate_dsn(dsn: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(dsn).map_err(|e| ConfigError::InvalidDsn {
        dsn: dsn.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "file" | "memory" | "s3" => Ok(url),
        scheme => Err(ConfigError::UnsupportedScheme(scheme.to_string())),
    }
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    let url = validate_dsn(dsn)?;

    match url.scheme() {
        "file" => {
            // Extract path from file:// URL
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(ConfigError::InvalidDsn {
                    dsn: dsn.to_string(),
                    reason: "File DSN must specify a path: file:///path/to/storage".to_string(),
                });
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(ConfigError::UnsupportedScheme(scheme.to_string())),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDsn {
        dsn: dsn.to_string(),
        reason: reason.to_string(),
    };

    let host = dsn.host_str().ok_or_else(|| invalid("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(invalid("S3 DSN must specify a bucket: s3://host/bucket"));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1"); // Default region

    // Extract credentials from DSN if present
    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Real S3 needs no custom endpoint; S3-compatible stores (MinIO etc.) do
    let endpoint = if host.contains("amazonaws.com") {
        None
    } else {
        let scheme = if port == Some(443) { "https" } else { "http" };
        Some(match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        })
    };

    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false); // MinIO requires path-style URLs
    }

    // Check environment for AWS credentials if not in DSN
    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok(builder)
}
