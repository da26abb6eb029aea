//! Environment configuration.
//!
//! Everything is read once at startup; individual commands then demand the
//! subset they need, so a missing Pinecone key only stops commands that
//! talk to the index. Missing required values are fatal setup errors.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use secrecy::SecretString;

use vigil_core::bus::{KafkaSettings, ARCHIVER_GROUP, EXTRACTOR_GROUP, INTERACTIONS_TOPIC, RESULTS_TOPIC};

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn secret(name: &str) -> Option<SecretString> {
    var(name).map(SecretString::from)
}

/// Full environment surface of the pipeline.
#[derive(Debug)]
pub struct Config {
    /// Cloud project id (`GOOGLE_CLOUD_PROJECT` / `GCP_PROJECT`).
    pub project: Option<String>,
    /// Provider region (`GCP_LOCATION`, default `us-central1`).
    pub location: String,
    /// Kafka bootstrap servers (`KAFKA_BOOTSTRAP_SERVERS`).
    pub kafka_bootstrap_servers: Option<String>,
    /// SASL username (`KAFKA_API_KEY`).
    pub kafka_api_key: Option<SecretString>,
    /// SASL password (`KAFKA_API_SECRET`).
    pub kafka_api_secret: Option<SecretString>,
    /// Interactions topic (`KAFKA_TOPIC`).
    pub interactions_topic: String,
    /// Results topic (`KAFKA_TOPIC_BATCH_RESULTS`).
    pub results_topic: String,
    /// Archiver consumer group (`KAFKA_ARCHIVER_GROUP_ID`).
    pub archiver_group: String,
    /// Extractor consumer group (`KAFKA_CONSUMER_GROUP_ID`).
    pub extractor_group: String,
    /// Raw archive bucket (`GCS_RAW_BUCKET`).
    pub raw_bucket: Option<String>,
    /// Batch staging bucket (`GCS_BATCH_STAGING_BUCKET`).
    pub staging_bucket: Option<String>,
    /// Judge output bucket (`GCS_PROCESSED_BUCKET`).
    pub output_bucket: Option<String>,
    /// Judge model id (`MODEL_ID`).
    pub model: Option<String>,
    /// Judge prompt template path (`PROMPT_PATH`).
    pub judge_prompt_path: PathBuf,
    /// Extraction prompt template path (`EXTRACT_PROMPT_PATH`).
    pub extract_prompt_path: PathBuf,
    /// Pinecone API key (`PINECONE_API_KEY`).
    pub pinecone_api_key: Option<SecretString>,
    /// Pinecone index host (`PINECONE_INDEX_HOST`).
    pub pinecone_index_host: Option<String>,
    /// Bearer token for Google APIs (`GOOGLE_OAUTH_ACCESS_TOKEN`).
    pub google_access_token: Option<SecretString>,
    /// Extractor idle timeout (`IDLE_TIMEOUT_SECONDS`, default 30).
    pub idle_timeout: Duration,
    /// Extractor dry-run flag (`DRY_RUN`).
    pub dry_run: bool,
    /// Gate HTTP port (`PORT`, default 8080).
    pub port: u16,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a present value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let idle_seconds = match var("IDLE_TIMEOUT_SECONDS") {
            Some(v) => v
                .parse::<u64>()
                .context("IDLE_TIMEOUT_SECONDS must be an integer")?,
            None => 30,
        };
        let port = match var("PORT") {
            Some(v) => v.parse::<u16>().context("PORT must be a port number")?,
            None => 8080,
        };

        Ok(Self {
            project: var("GOOGLE_CLOUD_PROJECT").or_else(|| var("GCP_PROJECT")),
            location: var("GCP_LOCATION").unwrap_or_else(|| "us-central1".to_string()),
            kafka_bootstrap_servers: var("KAFKA_BOOTSTRAP_SERVERS"),
            kafka_api_key: secret("KAFKA_API_KEY"),
            kafka_api_secret: secret("KAFKA_API_SECRET"),
            interactions_topic: var("KAFKA_TOPIC")
                .unwrap_or_else(|| INTERACTIONS_TOPIC.to_string()),
            results_topic: var("KAFKA_TOPIC_BATCH_RESULTS")
                .unwrap_or_else(|| RESULTS_TOPIC.to_string()),
            archiver_group: var("KAFKA_ARCHIVER_GROUP_ID")
                .unwrap_or_else(|| ARCHIVER_GROUP.to_string()),
            extractor_group: var("KAFKA_CONSUMER_GROUP_ID")
                .unwrap_or_else(|| EXTRACTOR_GROUP.to_string()),
            raw_bucket: var("GCS_RAW_BUCKET"),
            staging_bucket: var("GCS_BATCH_STAGING_BUCKET"),
            output_bucket: var("GCS_PROCESSED_BUCKET"),
            model: var("MODEL_ID"),
            judge_prompt_path: var("PROMPT_PATH")
                .unwrap_or_else(|| "prompts/security-judge.prompt.yml".to_string())
                .into(),
            extract_prompt_path: var("EXTRACT_PROMPT_PATH")
                .unwrap_or_else(|| "prompts/extract-injection.prompt.yml".to_string())
                .into(),
            pinecone_api_key: secret("PINECONE_API_KEY"),
            pinecone_index_host: var("PINECONE_INDEX_HOST"),
            google_access_token: secret("GOOGLE_OAUTH_ACCESS_TOKEN"),
            idle_timeout: Duration::from_secs(idle_seconds),
            dry_run: var("DRY_RUN").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            port,
        })
    }

    /// Kafka settings, or a fatal error when the brokers are unset.
    pub fn kafka(&self) -> Result<KafkaSettings> {
        let Some(bootstrap) = self.kafka_bootstrap_servers.clone() else {
            bail!("KAFKA_BOOTSTRAP_SERVERS must be set");
        };
        Ok(KafkaSettings {
            bootstrap_servers: bootstrap,
            api_key: self.kafka_api_key.clone(),
            api_secret: self.kafka_api_secret.clone(),
        })
    }

    /// Unwraps an optional setting, naming the variable in the error.
    pub fn require<T: Clone>(value: &Option<T>, name: &str) -> Result<T> {
        value
            .clone()
            .with_context(|| format!("{name} must be set"))
    }
}
