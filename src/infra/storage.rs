use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;

use crate::config::{AppConfig, BucketNames};
use crate::domain::storage::Bucket;
use crate::error::{PipelineError, PipelineResult};

// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub content_type: String,
    pub upsert: bool,
}

/// Object storage collaborator. Implementations must treat `upsert = false`
/// as a conditional create and report an existing object as `Conflict`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Bytes,
        options: UploadOptions,
    ) -> PipelineResult<()>;

    /// Best-effort batch delete. Returns how many paths the store acknowledged.
    async fn remove(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<usize>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;

    async fn signed_urls(
        &self,
        bucket: Bucket,
        paths: &[String],
        ttl: Duration,
    ) -> PipelineResult<HashMap<String, String>>;

    async fn download(&self, bucket: Bucket, path: &str) -> PipelineResult<Bytes>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    buckets: BucketNames,
    public_endpoint: String,
    rewrite_endpoint: Option<String>,
}

impl S3ObjectStore {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.s3_endpoint.clone())
            .force_path_style(true);
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let s3_config = s3_builder.build();

        let public_endpoint = config
            .s3_public_endpoint
            .clone()
            .unwrap_or_else(|| config.s3_endpoint.clone());
        Url::parse(&public_endpoint)
            .map_err(|err| anyhow!("invalid public storage endpoint: {}", err))?;

        Ok(Self {
            client: Client::from_conf(s3_config),
            buckets: config.buckets.clone(),
            public_endpoint: public_endpoint.trim_end_matches('/').to_string(),
            rewrite_endpoint: config.s3_public_endpoint.clone(),
        })
    }

    pub fn bucket_name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Avatars => &self.buckets.avatars,
            Bucket::Banners => &self.buckets.banners,
            Bucket::PostMedia => &self.buckets.post_media,
        }
    }

    async fn presign_get(&self, bucket: Bucket, path: &str, ttl: Duration) -> PipelineResult<String> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|err| PipelineError::validation(format!("invalid signed url ttl: {}", err)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(self.bucket_name(bucket))
            .key(path)
            .presigned(presign_config)
            .await
            .map_err(classify_sdk_error)?;

        let mut url = presigned.uri().to_string();
        if let Some(ref public_endpoint) = self.rewrite_endpoint {
            match rewrite_presigned_url(&url, public_endpoint) {
                Ok(rewritten) => url = rewritten,
                Err(err) => warn!(error = ?err, %bucket, path, "failed to rewrite presigned URL"),
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Bytes,
        options: UploadOptions,
    ) -> PipelineResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(self.bucket_name(bucket))
            .key(path)
            .content_type(options.content_type)
            .body(ByteStream::from(bytes));
        if !options.upsert {
            request = request.if_none_match("*");
        }

        match request.send().await {
            Ok(_) => {
                debug!(%bucket, path, "object uploaded");
                Ok(())
            }
            Err(err) if http_status(&err) == Some(412) => Err(PipelineError::Conflict {
                bucket,
                path: path.to_string(),
            }),
            Err(err) => Err(classify_sdk_error(err)),
        }
    }

    async fn remove(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<usize> {
        let mut removed = 0;
        for chunk in paths.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|path| ObjectIdentifier::builder().key(path).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| PipelineError::validation(err.to_string()))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|err| PipelineError::validation(err.to_string()))?;

            match self
                .client
                .delete_objects()
                .bucket(self.bucket_name(bucket))
                .delete(delete)
                .send()
                .await
            {
                Ok(output) => {
                    let errors = output.errors();
                    for error in errors {
                        warn!(
                            %bucket,
                            path = error.key().unwrap_or_default(),
                            code = error.code().unwrap_or_default(),
                            "object removal rejected"
                        );
                    }
                    removed += chunk.len().saturating_sub(errors.len());
                }
                Err(err) => {
                    warn!(error = ?err, %bucket, count = chunk.len(), "batch object removal failed");
                }
            }
        }
        Ok(removed)
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/{}/{}", self.public_endpoint, self.bucket_name(bucket), path)
    }

    async fn signed_urls(
        &self,
        bucket: Bucket,
        paths: &[String],
        ttl: Duration,
    ) -> PipelineResult<HashMap<String, String>> {
        let futures = paths.iter().map(|path| async move {
            let url = self.presign_get(bucket, path, ttl).await?;
            Ok::<_, PipelineError>((path.clone(), url))
        });

        futures::future::try_join_all(futures)
            .await
            .map(|pairs| pairs.into_iter().collect())
    }

    async fn download(&self, bucket: Bucket, path: &str) -> PipelineResult<Bytes> {
        let object = match self
            .client
            .get_object()
            .bucket(self.bucket_name(bucket))
            .key(path)
            .send()
            .await
        {
            Ok(object) => object,
            Err(err) if http_status(&err) == Some(404) => {
                return Err(PipelineError::NotFound(format!("{}/{}", bucket, path)))
            }
            Err(err) => return Err(classify_sdk_error(err)),
        };

        let data = object
            .body
            .collect()
            .await
            .map_err(|err| PipelineError::transient(format!("object body read failed: {}", err)))?;
        Ok(data.into_bytes())
    }
}

fn http_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Network and 5xx failures are retryable; any other service rejection is not.
fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>) -> PipelineError
where
    E: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            PipelineError::transient(format!("{:?}", err))
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            if status >= 500 || status == 429 {
                PipelineError::transient(format!("storage returned {}: {:?}", status, service.err()))
            } else {
                PipelineError::validation(format!(
                    "storage rejected request ({}): {:?}",
                    status,
                    service.err()
                ))
            }
        }
        _ => PipelineError::validation(format!("{:?}", err)),
    }
}

fn rewrite_presigned_url(original: &str, public_endpoint: &str) -> Result<String> {
    let mut original_url = Url::parse(original)?;
    let public_url = if public_endpoint.contains("://") {
        Url::parse(public_endpoint)?
    } else {
        Url::parse(&format!("http://{}", public_endpoint))?
    };

    original_url
        .set_scheme(public_url.scheme())
        .map_err(|_| anyhow!("invalid scheme for public endpoint"))?;
    original_url
        .set_host(public_url.host_str())
        .map_err(|_| anyhow!("invalid host for public endpoint"))?;
    original_url.set_port(public_url.port()).ok();

    Ok(original_url.to_string())
}
