//! Google Cloud Storage adapter over the JSON API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{StatusCode, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{date_prefix, BlobError, BlobReader, BlobWriter, RAW_PREFIX};
use crate::auth::AccessTokenProvider;

const DEFAULT_API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const DEFAULT_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListedObject>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Bucket-scoped GCS client implementing both blob capabilities.
pub struct GcsClient {
    http: reqwest::Client,
    bucket: String,
    api_base: String,
    upload_base: String,
    token_provider: Arc<dyn AccessTokenProvider>,
}

impl GcsClient {
    /// Creates a client for `bucket` against the public GCS endpoints.
    #[must_use]
    pub fn new(bucket: impl Into<String>, token_provider: Arc<dyn AccessTokenProvider>) -> Self {
        Self::with_endpoints(bucket, token_provider, DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE)
    }

    /// Creates a client with explicit endpoints, for emulators.
    #[must_use]
    pub fn with_endpoints(
        bucket: impl Into<String>,
        token_provider: Arc<dyn AccessTokenProvider>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            bucket: bucket.into(),
            api_base: api_base.into(),
            upload_base: upload_base.into(),
            token_provider,
        }
    }

    fn bearer(&self) -> Result<String, BlobError> {
        let token = self
            .token_provider
            .access_token()
            .map_err(|e| BlobError::Config {
                message: e.to_string(),
            })?;
        Ok(format!("Bearer {}", token.expose_secret()))
    }

    fn object_url(&self, key: &str) -> Result<Url, BlobError> {
        let mut url =
            Url::parse(&format!("{}/b/{}/o/", self.api_base, self.bucket)).map_err(|e| {
                BlobError::Config {
                    message: e.to_string(),
                }
            })?;
        // push() percent-encodes the key, including its slashes, as a single
        // path segment - which is how the JSON API addresses objects.
        url.path_segments_mut()
            .map_err(|()| BlobError::Config {
                message: "api base cannot be a base url".to_string(),
            })?
            .pop_if_empty()
            .push(key);
        Ok(url)
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        max_results: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<ListResponse, BlobError> {
        let mut url = Url::parse(&format!("{}/b/{}/o", self.api_base, self.bucket)).map_err(
            |e| BlobError::Config {
                message: e.to_string(),
            },
        )?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(delimiter) = delimiter {
                query.append_pair("delimiter", delimiter);
            }
            if let Some(max) = max_results {
                query.append_pair("maxResults", &max.to_string());
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await
            .map_err(|e| BlobError::Read {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(BlobError::Read {
                message: format!("list returned {}", response.status()),
            });
        }

        response.json().await.map_err(|e| BlobError::Read {
            message: e.to_string(),
        })
    }

    /// Lists every object name under `prefix`, following pagination.
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_page(prefix, None, None, page_token.as_deref())
                .await?;
            names.extend(page.items.into_iter().map(|o| o.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl BlobWriter for GcsClient {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let mut url = Url::parse(&format!("{}/b/{}/o", self.upload_base, self.bucket)).map_err(
            |e| BlobError::Config {
                message: e.to_string(),
            },
        )?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| BlobError::Write {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(BlobError::Write {
                key: key.to_string(),
                message: format!("upload returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobReader for GcsClient {
    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await
            .map_err(|e| BlobError::Read {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound {
                key: key.to_string(),
            }),
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(|e| BlobError::Read {
                    message: e.to_string(),
                })?;
                Ok(bytes.to_vec())
            }
            status => Err(BlobError::Read {
                message: format!("read of {key} returned {status}"),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        self.list_all(prefix).await
    }

    async fn list_active_conversations(&self, date: NaiveDate) -> Result<Vec<String>, BlobError> {
        // One delimited listing yields the conversation prefixes; each is
        // then probed with a single-result listing under the date path.
        let top = self.list_page(RAW_PREFIX, Some("/"), None, None).await?;
        let wanted = date_prefix(date);

        let mut conversations = Vec::new();
        for prefix in top.prefixes {
            let Some(conv) = prefix
                .strip_prefix(RAW_PREFIX)
                .and_then(|p| p.strip_suffix('/'))
            else {
                continue;
            };
            let probe = format!("{prefix}{wanted}/");
            let page = self.list_page(&probe, None, Some(1), None).await?;
            if !page.items.is_empty() {
                conversations.push(conv.to_string());
            }
        }
        conversations.sort();
        Ok(conversations)
    }

    async fn list_conversation_chunks(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, BlobError> {
        self.list_all(&format!("{RAW_PREFIX}{conversation_id}/"))
            .await
    }
}
