//! S3-compatible REST implementation of [`StorageClient`]
//!
//! Requests are path-style (`{endpoint}/{bucket}/{key}`) and unsigned;
//! credentials are expected to be handled by the endpoint or a signing
//! gateway in front of it.

use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::models::{CompletedPart, InitiateRequest, ObjectDescriptor, UploadSession};
use crate::storage_client::StorageClient;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, ETAG};
use reqwest::{Client, Response, Url};
use std::time::Duration;
use tracing::debug;

const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";

/// Storage client for S3-compatible object stores
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL of the object store
    endpoint: Url,
}

impl HttpStorageClient {
    /// Create a new HttpStorageClient
    ///
    /// # Arguments
    /// * `endpoint` - Base URL, e.g. `http://127.0.0.1:9000`
    /// * `timeout` - Per-request timeout
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            UploadError::ConfigError(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;

        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                UploadError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(HttpStorageClient {
            http_client,
            endpoint,
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(&config.endpoint, config.request_timeout())
    }

    /// Build the URL of an object, percent-encoding each key segment
    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UploadError::ConfigError(format!(
                    "Endpoint cannot be used as a base URL: {}",
                    self.endpoint
                ))
            })?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        Ok(url)
    }

    fn session_url(&self, session: &UploadSession) -> Result<Url> {
        let mut url = self.object_url(&session.bucket, &session.key)?;
        url.query_pairs_mut()
            .append_pair("uploadId", &session.upload_id);
        Ok(url)
    }

    /// Turn a non-2xx response into a typed error
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = extract_tag(&body, "Code")
            .or_else(|| extract_tag(&body, "Message"))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        Err(UploadError::from_http_status(status.as_u16(), message))
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn initiate(&self, request: &InitiateRequest) -> Result<String> {
        let mut url = self.object_url(&request.bucket, &request.key)?;
        url.set_query(Some("uploads"));

        debug!("POST {} (storage class {})", url, request.storage_class);
        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, request.content_type.as_str())
            .header(STORAGE_CLASS_HEADER, request.storage_class.as_str())
            .send()
            .await?;
        let body = Self::check_status(response).await?.text().await?;

        extract_tag(&body, "UploadId").ok_or_else(|| {
            UploadError::ParseError("InitiateMultipartUpload response has no UploadId".to_string())
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_index: u32,
        payload: Bytes,
    ) -> Result<String> {
        let mut url = self.session_url(session)?;
        url.query_pairs_mut()
            .append_pair("partNumber", &part_index.to_string());

        let response = self
            .http_client
            .put(url)
            .body(payload)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let etag = response
            .headers()
            .get(ETAG)
            .ok_or_else(|| {
                UploadError::ParseError(format!("Missing ETag header for part {}", part_index))
            })?
            .to_str()
            .map_err(|e| UploadError::ParseError(format!("Invalid ETag header: {}", e)))?;

        Ok(etag.to_string())
    }

    async fn finalize(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> Result<ObjectDescriptor> {
        let url = self.session_url(session)?;

        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/xml")
            .body(complete_body(parts))
            .send()
            .await?;
        let body = Self::check_status(response).await?.text().await?;

        // CompleteMultipartUpload may report failure inside a 200 response
        if body.contains("<Error>") {
            let message = extract_tag(&body, "Message")
                .or_else(|| extract_tag(&body, "Code"))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(UploadError::FinalizeError(message));
        }

        Ok(ObjectDescriptor {
            bucket: extract_tag(&body, "Bucket").unwrap_or_else(|| session.bucket.clone()),
            key: extract_tag(&body, "Key").unwrap_or_else(|| session.key.clone()),
            etag: extract_tag(&body, "ETag"),
            location: extract_tag(&body, "Location"),
        })
    }

    async fn abort(&self, session: &UploadSession) -> Result<()> {
        let url = self.session_url(session)?;
        let response = self.http_client.delete(url).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

/// XML document listing the parts to stitch together, in the given order
fn complete_body(parts: &[CompletedPart]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for part in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.index,
            xml_escape(&part.etag)
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

/// Text of the first `<tag>` element in a flat XML response
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find(&close)?;
    Some(xml_unescape(body[start..end].trim()))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
