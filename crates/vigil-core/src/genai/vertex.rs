//! Vertex AI adapter over the regional REST surface.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use super::{BatchJob, BatchJobClient, BatchJobSpec, GenAiError, JobState, TextGenerator};
use crate::auth::AccessTokenProvider;

/// Client for batch prediction jobs and single-shot generation.
pub struct VertexClient {
    http: reqwest::Client,
    project: String,
    location: String,
    api_base: String,
    token_provider: Arc<dyn AccessTokenProvider>,
}

impl VertexClient {
    /// Creates a client against the region's public endpoint.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        token_provider: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let location = location.into();
        let api_base = format!("https://{location}-aiplatform.googleapis.com/v1");
        Self {
            http: reqwest::Client::new(),
            project: project.into(),
            location,
            api_base,
            token_provider,
        }
    }

    /// Overrides the API base URL, for emulators.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn bearer(&self) -> Result<String, GenAiError> {
        let token = self
            .token_provider
            .access_token()
            .map_err(|e| GenAiError::Config {
                message: e.to_string(),
            })?;
        Ok(format!("Bearer {}", token.expose_secret()))
    }

    fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    name: String,
    #[serde(default = "unspecified")]
    state: JobState,
}

fn unspecified() -> JobState {
    JobState::JobStateUnspecified
}

#[derive(Debug, Default, Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateCandidate {
    #[serde(default)]
    content: GenerateContent,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[async_trait]
impl BatchJobClient for VertexClient {
    async fn create_batch_job(&self, spec: &BatchJobSpec) -> Result<BatchJob, GenAiError> {
        let url = format!("{}/{}/batchPredictionJobs", self.api_base, self.parent());
        let body = json!({
            "displayName": spec.display_name,
            "model": spec.model,
            "inputConfig": {
                "instancesFormat": "jsonl",
                "gcsSource": { "uris": [spec.input_uri] },
            },
            "outputConfig": {
                "predictionsFormat": "jsonl",
                "gcsDestination": { "outputUriPrefix": spec.output_uri_prefix },
            },
        });

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenAiError::Submit {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GenAiError::Submit {
                message: format!("job creation returned {}", response.status()),
            });
        }

        let parsed: JobResponse = response.json().await.map_err(|e| GenAiError::Submit {
            message: e.to_string(),
        })?;
        Ok(BatchJob {
            name: parsed.name,
            state: parsed.state,
        })
    }
}

#[async_trait]
impl TextGenerator for VertexClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenAiError> {
        let url = format!(
            "{}/{}/publishers/google/models/{model}:generateContent",
            self.api_base,
            self.parent()
        );
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenAiError::Generate {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GenAiError::Generate {
                message: format!("generateContent returned {}", response.status()),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| GenAiError::Generate {
                message: e.to_string(),
            })?;

        // Candidates occasionally split output across parts; concatenate.
        let text = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();
        Ok(text)
    }
}
