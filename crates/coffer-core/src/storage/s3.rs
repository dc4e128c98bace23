use std::io::Read;
use std::time::Duration;

use rusty_s3::actions::S3Action;
use rusty_s3::{Bucket, Credentials, UrlStyle};
use ureq::SendBody;

use crate::error::{CofferError, Result};
use crate::storage::{CountingReader, StorageLayer};

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct S3Config {
    #[serde(rename = "s3Region", default)]
    pub region: String,
    #[serde(rename = "s3Bucket", default)]
    pub bucket: String,
    #[serde(rename = "awsAccessKey", default)]
    pub access_key: String,
    #[serde(rename = "awsSecretKey", default)]
    pub secret_key: String,
}

/// Storage layer backed by an S3 bucket, using presigned requests.
pub struct S3Storage {
    bucket: Bucket,
    credentials: Credentials,
    agent: ureq::Agent,
}

impl S3Storage {
    pub fn new(cfg: &S3Config) -> Result<Self> {
        let endpoint = format!("https://s3.{}.amazonaws.com", cfg.region);
        let base_url = endpoint
            .parse()
            .map_err(|e| CofferError::Config(format!("invalid S3 endpoint '{endpoint}': {e}")))?;
        let bucket = Bucket::new(
            base_url,
            UrlStyle::Path,
            cfg.bucket.clone(),
            cfg.region.clone(),
        )
        .map_err(|e| CofferError::Config(format!("failed to create S3 bucket handle: {e}")))?;
        let credentials = Credentials::new(&cfg.access_key, &cfg.secret_key);

        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(30)))
            .timeout_global(Some(Duration::from_secs(300)))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        Ok(Self {
            bucket,
            credentials,
            agent,
        })
    }

    fn storage_err(op: &str, err: ureq::Error) -> CofferError {
        CofferError::Storage(format!("S3 {op}: {err}"))
    }
}

impl StorageLayer for S3Storage {
    fn exists(&self) -> Result<bool> {
        let action = self.bucket.head_bucket(Some(&self.credentials));
        let url = action.sign(PRESIGN_DURATION);
        match self.agent.head(url.as_str()).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(Self::storage_err("head bucket", e)),
        }
    }

    fn create(&self) -> Result<()> {
        let action = self.bucket.create_bucket(&self.credentials);
        let url = action.sign(PRESIGN_DURATION);
        match self.agent.put(url.as_str()).send_empty() {
            Ok(_) => Ok(()),
            // Already owned by us; the container is usable.
            Err(ureq::Error::StatusCode(409)) => Ok(()),
            Err(e) => Err(Self::storage_err("create bucket", e)),
        }
    }

    fn size(&self, key: &str) -> Result<u64> {
        let action = self.bucket.head_object(Some(&self.credentials), key);
        let url = action.sign(PRESIGN_DURATION);
        match self.agent.head(url.as_str()).call() {
            Ok(resp) => resp
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| CofferError::Storage("S3 head object: no content length".into())),
            Err(ureq::Error::StatusCode(404)) => Err(CofferError::ObjectNotFound(key.to_string())),
            Err(e) => Err(Self::storage_err("head object", e)),
        }
    }

    fn get_reader(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let action = self.bucket.get_object(Some(&self.credentials), key);
        let url = action.sign(PRESIGN_DURATION);
        match self.agent.get(url.as_str()).call() {
            Ok(resp) => Ok(Box::new(resp.into_body().into_reader())),
            Err(ureq::Error::StatusCode(404)) => Err(CofferError::ObjectNotFound(key.to_string())),
            Err(e) => Err(Self::storage_err("get object", e)),
        }
    }

    fn put_reader(&self, key: &str, r: &mut dyn Read) -> Result<u64> {
        let action = self.bucket.put_object(Some(&self.credentials), key);
        let url = action.sign(PRESIGN_DURATION);
        let mut counted = CountingReader::new(r);
        self.agent
            .put(url.as_str())
            .send(SendBody::from_reader(&mut counted))
            .map_err(|e| Self::storage_err("put object", e))?;
        Ok(counted.count())
    }
}
