//! S3-compatible [`BlobStore`] (AWS S3, MinIO).

use super::BlobStore;
use crate::config::StoreConfig;
use crate::errors::DemandflowError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::fmt;

const CSV_CONTENT_TYPE: &str = "text/csv";

/// Blob store over an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the bucket name is empty.
    pub async fn new(config: &StoreConfig) -> Result<Self, DemandflowError> {
        if config.bucket.is_empty() {
            return Err(DemandflowError::Config("bucket name cannot be empty".into()));
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "demandflow");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    /// Returns the bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn unavailable(err: impl fmt::Display) -> DemandflowError {
    DemandflowError::StoreUnavailable(err.to_string())
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_object(&self, key: &str, bytes: Bytes) -> Result<(), DemandflowError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(CSV_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| unavailable(aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, DemandflowError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) if service_err.err().is_no_such_key() => {
                    DemandflowError::not_found(key)
                }
                other => unavailable(aws_sdk_s3::error::DisplayErrorContext(other)),
            })?;

        let data = output.body.collect().await.map_err(unavailable)?;
        Ok(data.into_bytes())
    }
}
