use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub s3_endpoint: String,
    pub s3_public_endpoint: Option<String>,
    pub s3_region: String,
    pub buckets: BucketNames,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub max_open_decoders: usize,
    pub pipeline: PipelineSettings,
}

#[derive(Clone, Debug)]
pub struct BucketNames {
    pub avatars: String,
    pub banners: String,
    pub post_media: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            avatars: "avatars".to_string(),
            banners: "party-banners".to_string(),
            post_media: "link-post-media".to_string(),
        }
    }
}

/// Knobs consumed by the pipeline services themselves.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub signed_url_ttl: Duration,
    pub signed_url_safety_margin: Duration,
    pub network_timeout: Duration,
    pub compress_max_dimension: u32,
    pub compress_quality: u8,
    pub thumbnail_max_dimension: u32,
    pub thumbnail_quality: u8,
    pub avatar_max_dimension: u32,
    pub scratch_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            signed_url_ttl: Duration::from_secs(3600),
            signed_url_safety_margin: Duration::from_secs(300),
            network_timeout: Duration::from_secs(30),
            compress_max_dimension: 2048,
            compress_quality: 80,
            thumbnail_max_dimension: 320,
            thumbnail_quality: 50,
            avatar_max_dimension: 512,
            scratch_dir: std::env::temp_dir().join("partyshot"),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            signed_url_ttl: Duration::from_secs(env_or_parse("SIGNED_URL_TTL_SECONDS", "3600")?),
            signed_url_safety_margin: defaults.signed_url_safety_margin,
            network_timeout: Duration::from_secs(env_or_parse("NETWORK_TIMEOUT_SECONDS", "30")?),
            compress_max_dimension: env_or_parse("COMPRESS_MAX_DIMENSION", "2048")?,
            compress_quality: env_or_parse("COMPRESS_QUALITY", "80")?,
            thumbnail_max_dimension: env_or_parse("THUMBNAIL_MAX_DIMENSION", "320")?,
            thumbnail_quality: env_or_parse("THUMBNAIL_QUALITY", "50")?,
            avatar_max_dimension: defaults.avatar_max_dimension,
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
        };
        if pipeline.signed_url_ttl <= pipeline.signed_url_safety_margin {
            return Err(anyhow!(
                "SIGNED_URL_TTL_SECONDS must exceed the {}s cache safety margin",
                pipeline.signed_url_safety_margin.as_secs()
            ));
        }
        if !(1..=100).contains(&pipeline.compress_quality)
            || !(1..=100).contains(&pipeline.thumbnail_quality)
        {
            return Err(anyhow!("encoder quality must be between 1 and 100"));
        }

        let bucket_defaults = BucketNames::default();

        Ok(Self {
            http_addr,
            database_url: env_or_err("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL").ok(),
            s3_endpoint: env_or_err("S3_ENDPOINT")?,
            s3_public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
            s3_region: env_or("S3_REGION", "fr-par"),
            buckets: BucketNames {
                avatars: env_or("AVATAR_BUCKET", &bucket_defaults.avatars),
                banners: env_or("BANNER_BUCKET", &bucket_defaults.banners),
                post_media: env_or("POST_MEDIA_BUCKET", &bucket_defaults.post_media),
            },
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            max_open_decoders: env_or_parse("MAX_OPEN_DECODERS", "2")?,
            pipeline,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
