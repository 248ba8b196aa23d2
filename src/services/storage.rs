use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::AppError;

/// Blob store for prosecutor documents: one bucket, objects addressed by key.
#[derive(Clone)]
pub struct BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl BlobStore {
    pub async fn connect(bucket: &str, public_base_url: Option<&str>) -> Self {
        let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_s3::Client::new(&aws_config),
            bucket: bucket.to_string(),
            public_base_url: public_base_url
                .map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub async fn upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), AppError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(ToOwned::to_owned))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| {
                AppError::Dependency(format!("Blob upload failed: {error}"))
            })?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| {
                AppError::Dependency(format!("Blob delete failed: {error}"))
            })?;
        Ok(())
    }

    pub fn object_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("https://{}.s3.amazonaws.com/{key}", self.bucket),
        }
    }
}
