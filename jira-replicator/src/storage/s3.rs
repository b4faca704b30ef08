//! S3 multipart upload sink.

use crate::config::S3Config;
use crate::sink::{ChunkedSink, PartRecord, UploadOptions, UploadSession};
use crate::utils::{ReplicatorError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, ObjectCannedAcl, ServerSideEncryption, StorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

pub struct S3Sink {
    client: Client,
    bucket: String,
}

impl S3Sink {
    /// Build a client from the default credential chain.
    pub async fn from_config(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(ReplicatorError::Config("s3.bucket is required".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.endpoint.is_some() {
            // MinIO and friends
            builder = builder.force_path_style(true);
        }

        info!(bucket = %config.bucket, region = ?config.region, "S3 client ready");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ChunkedSink for S3Sink {
    async fn begin_upload(&self, key: &str, options: &UploadOptions) -> Result<UploadSession> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&options.content_type)
            .acl(ObjectCannedAcl::Private);

        if let Some(class) = &options.storage_class {
            request = request.storage_class(StorageClass::from(class.as_str()));
        }
        if let Some(key_id) = &options.encryption_key_id {
            request = request
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(key_id);
        }
        for (name, value) in &options.metadata {
            request = request.metadata(name, value);
        }

        let output = request.send().await.map_err(|e| {
            ReplicatorError::Storage(format!(
                "CreateMultipartUpload s3://{}/{}: {}",
                self.bucket,
                key,
                DisplayErrorContext(&e)
            ))
        })?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| ReplicatorError::Storage("CreateMultipartUpload returned no upload id".into()))?;

        Ok(UploadSession {
            upload_id: upload_id.to_string(),
            key: key.to_string(),
        })
    }

    async fn upload_part(&self, session: &UploadSession, index: i32, body: Bytes) -> Result<String> {
        let length = body.len();
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(index)
            .content_length(length as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                ReplicatorError::Storage(format!("UploadPart {}: {}", index, DisplayErrorContext(&e)))
            })?;

        debug!(part = index, bytes = length, "S3 part stored");
        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| ReplicatorError::Storage(format!("UploadPart {} returned no ETag", index)))
    }

    async fn complete_upload(&self, session: UploadSession, mut parts: Vec<PartRecord>) -> Result<String> {
        // S3 refuses to complete an upload without parts
        if parts.is_empty() {
            let token = self.upload_part(&session, 1, Bytes::new()).await?;
            parts.push(PartRecord { index: 1, token });
        }

        let completed: Vec<CompletedPart> = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.index)
                    .e_tag(part.token)
                    .build()
            })
            .collect();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                ReplicatorError::Storage(format!(
                    "CompleteMultipartUpload s3://{}/{}: {}",
                    self.bucket,
                    session.key,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(output.e_tag().unwrap_or_default().to_string())
    }
}
