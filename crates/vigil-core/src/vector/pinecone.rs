//! Pinecone adapter over the data-plane REST API.
//!
//! Uses the integrated-inference text endpoints: records are upserted as
//! text and the service embeds them server-side, which is what makes the
//! whole index text-in/text-out. Passage/query prefixes follow the E5-style
//! models the managed indexes run.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{InjectionRecord, VectorError, VectorIndex, VectorMatch, MAX_UPSERT_BATCH};

const API_VERSION: &str = "2025-01";
const PASSAGE_PREFIX: &str = "passage: ";
const QUERY_PREFIX: &str = "query: ";

/// Index-host-scoped Pinecone client.
pub struct PineconeClient {
    http: reqwest::Client,
    base: String,
    namespace: String,
    api_key: SecretString,
}

impl PineconeClient {
    /// Creates a client for the given index host (with or without scheme)
    /// using the default namespace.
    #[must_use]
    pub fn new(index_host: &str, api_key: SecretString) -> Self {
        Self::with_namespace(index_host, api_key, "__default__")
    }

    /// Creates a client bound to a specific namespace.
    #[must_use]
    pub fn with_namespace(index_host: &str, api_key: SecretString, namespace: &str) -> Self {
        let base = if index_host.starts_with("http://") || index_host.starts_with("https://") {
            index_host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", index_host.trim_end_matches('/'))
        };
        Self {
            http: reqwest::Client::new(),
            base,
            namespace: namespace.to_string(),
            api_key,
        }
    }

    fn headers(&self) -> Result<HeaderMap, VectorError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(self.api_key.expose_secret()).map_err(|_| {
            VectorError::Config {
                message: "api key contains invalid header characters".to_string(),
            }
        })?;
        headers.insert("Api-Key", key);
        headers.insert(
            "X-Pinecone-API-Version",
            HeaderValue::from_static(API_VERSION),
        );
        Ok(headers)
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: f32,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: SearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct FetchedVector {
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: BTreeMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    total_vector_count: u64,
}

#[async_trait]
impl VectorIndex for PineconeClient {
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>, VectorError> {
        let url = format!(
            "{}/records/namespaces/{}/search",
            self.base, self.namespace
        );
        let body = json!({
            "query": {
                "inputs": { "text": format!("{QUERY_PREFIX}{text}") },
                "top_k": top_k,
            }
        });

        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Query {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(VectorError::Query {
                message: format!("search returned {}", response.status()),
            });
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| VectorError::Query {
            message: e.to_string(),
        })?;
        Ok(parsed
            .result
            .hits
            .into_iter()
            .map(|hit| VectorMatch {
                id: hit.id,
                score: hit.score,
            })
            .collect())
    }

    async fn upsert(&self, records: &[InjectionRecord]) -> Result<(), VectorError> {
        if records.len() > MAX_UPSERT_BATCH {
            return Err(VectorError::BatchTooLarge {
                size: records.len(),
            });
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut body = Vec::new();
        for record in records {
            let mut line = serde_json::Map::new();
            line.insert("_id".to_string(), json!(record.id));
            line.insert(
                "chunk_text".to_string(),
                json!(format!("{PASSAGE_PREFIX}{}", record.text)),
            );
            for (k, v) in &record.metadata {
                line.insert(k.clone(), json!(v));
            }
            serde_json::to_writer(&mut body, &line).map_err(|e| VectorError::Upsert {
                message: e.to_string(),
            })?;
            body.push(b'\n');
        }

        let url = format!(
            "{}/records/namespaces/{}/upsert",
            self.base, self.namespace
        );
        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| VectorError::Upsert {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(VectorError::Upsert {
                message: format!("upsert returned {}", response.status()),
            });
        }
        Ok(())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<InjectionRecord>, VectorError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = reqwest::Url::parse(&format!("{}/vectors/fetch", self.base)).map_err(
            |e| VectorError::Config {
                message: e.to_string(),
            },
        )?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("namespace", &self.namespace);
            for id in ids {
                query.append_pair("ids", id);
            }
        }

        let response = self
            .http
            .get(url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| VectorError::Query {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(VectorError::Query {
                message: format!("fetch returned {}", response.status()),
            });
        }

        let parsed: FetchResponse = response.json().await.map_err(|e| VectorError::Query {
            message: e.to_string(),
        })?;

        Ok(parsed
            .vectors
            .into_iter()
            .map(|(id, vector)| {
                let mut metadata = BTreeMap::new();
                let mut text = String::new();
                for (k, v) in vector.metadata {
                    let Some(value) = v.as_str() else { continue };
                    if k == "chunk_text" {
                        text = value.strip_prefix(PASSAGE_PREFIX).unwrap_or(value).to_string();
                    } else {
                        metadata.insert(k, value.to_string());
                    }
                }
                InjectionRecord { id, text, metadata }
            })
            .collect())
    }

    async fn count(&self) -> Result<u64, VectorError> {
        let url = format!("{}/describe_index_stats", self.base);
        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| VectorError::Query {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(VectorError::Query {
                message: format!("describe_index_stats returned {}", response.status()),
            });
        }

        let parsed: StatsResponse = response.json().await.map_err(|e| VectorError::Query {
            message: e.to_string(),
        })?;
        Ok(parsed.total_vector_count)
    }

    async fn delete_all(&self) -> Result<(), VectorError> {
        let url = format!("{}/vectors/delete", self.base);
        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(&json!({ "deleteAll": true, "namespace": self.namespace }))
            .send()
            .await
            .map_err(|e| VectorError::Upsert {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(VectorError::Upsert {
                message: format!("delete returned {}", response.status()),
            });
        }
        Ok(())
    }
}
