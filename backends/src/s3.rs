use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use aws_sdk_s3::Client;
use snapferry_core::{Error, ObjectStore, RemoteObject, Result, Settings};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// S3-compatible object store. Listing serves the remote catalog; the
/// get/put stream methods are consumed only by the pipeline runner.
pub struct S3Store {
    client: Client,
    bucket: String,
    storage_class: Option<String>,
}

impl S3Store {
    /// Builds a client from resolved settings: AWS profile, endpoint
    /// (`"aws"` means the SDK default), and the required bucket.
    pub async fn connect(settings: &Settings, filesystem: &str) -> Result<Self> {
        let bucket = settings.require("bucket", Some(filesystem))?.to_string();
        let profile = settings.require("profile", Some(filesystem))?;
        let endpoint = settings.require("endpoint", Some(filesystem))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).profile_name(profile);
        if endpoint != "aws" {
            debug!(endpoint, "using custom S3 endpoint");
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        Ok(Self {
            client: Client::new(&config),
            bucket,
            storage_class: settings
                .get("storage_class", Some(filesystem))
                .map(str::to_string),
        })
    }

    /// Uploads a spooled stream with its snapshot metadata.
    pub async fn put(
        &self,
        key: &str,
        spool: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let body = ByteStream::from_path(spool)
            .await
            .map_err(|e| Error::Store(format!("cannot read spool for {key}: {e}")))?;
        let metadata: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .set_metadata(Some(metadata));
        if let Some(class) = &self.storage_class {
            request = request.storage_class(StorageClass::from(class.as_str()));
        }
        request
            .send()
            .await
            .map_err(|e| Error::Store(format!("failed to write {key}: {e}")))?;
        Ok(())
    }

    /// Opens the stored object as a byte stream.
    pub async fn get(&self, key: &str) -> Result<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Store(format!("failed to read {key}: {e}")))?;
        Ok(response.body)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| Error::Store(format!("failed to list '{prefix}': {e}")))?;

            if let Some(contents) = response.contents {
                keys.extend(contents.into_iter().filter_map(|o| o.key));
            }
            if response.is_truncated.unwrap_or(false) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        // Listing does not return user metadata, so each object gets one
        // head request. Catalogs are populated once per run.
        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            let head = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Error::Store(format!("failed to stat {key}: {e}")))?;
            objects.push(RemoteObject {
                metadata: head.metadata.unwrap_or_default(),
                length: head.content_length.unwrap_or(0) as u64,
                key,
            });
        }
        debug!(prefix, count = objects.len(), "listed remote snapshot objects");
        Ok(objects)
    }
}
