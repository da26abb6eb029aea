//! Wire types shared across the pipeline.
//!
//! Everything that crosses a substrate boundary - the admission HTTP surface,
//! the bus topics, the archive chunks, the judge batch files - is defined
//! here. Decoding is deliberately lenient: missing string fields default to
//! empty rather than failing, so a single malformed producer cannot poison a
//! consumer. Per-field validation happens in the stages, which decide
//! whether to skip or abort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompt::PromptMessage;

/// The speaker of a single conversation turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human turn.
    #[default]
    User,
    /// A model turn.
    Model,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One conversation turn as it travels the bus and lands in archive chunks.
///
/// This is the pipeline's own wire format: flat, one record per turn. The
/// richer [`Interaction`] shape used by external producers is accepted at the
/// ingestion gate and reduced to this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Unique id of this turn.
    #[serde(default)]
    pub interaction_id: String,
    /// Conversation this turn belongs to. Bus partition key.
    #[serde(default)]
    pub conversation_id: String,
    /// Server-assigned admission time.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// Who spoke.
    #[serde(default)]
    pub role: Role,
    /// The turn's text.
    #[serde(default)]
    pub content: String,
}

impl InteractionEvent {
    /// Returns true when the timestamp was never set by a producer.
    #[must_use]
    pub fn has_zero_timestamp(&self) -> bool {
        self.timestamp == DateTime::<Utc>::UNIX_EPOCH
    }
}

/// Metadata describing the origin of a user turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Caller-assigned user id.
    #[serde(default)]
    pub user_id: String,
    /// Source address as reported by the caller.
    #[serde(default)]
    pub source_ip: String,
    /// Client user agent.
    #[serde(default)]
    pub user_agent: String,
}

/// Metadata describing how a model turn was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Serving model id.
    #[serde(default)]
    pub model_id: String,
    /// End-to-end generation latency.
    #[serde(default)]
    pub latency_ms: i64,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: String,
}

/// A user turn with its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    /// The prompt text.
    #[serde(default)]
    pub content: String,
    /// Origin metadata.
    #[serde(default)]
    pub metadata: UserMetadata,
}

/// A model turn with its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutput {
    /// The response text.
    #[serde(default)]
    pub content: String,
    /// Generation metadata.
    #[serde(default)]
    pub metadata: ModelMetadata,
}

/// A full interaction as emitted by instrumented model-serving frontends:
/// one user turn plus the model's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique id of this interaction.
    #[serde(default)]
    pub interaction_id: String,
    /// Conversation this interaction belongs to.
    #[serde(default)]
    pub conversation_id: String,
    /// When the interaction happened.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// The user side of the turn.
    #[serde(default)]
    pub user_input: UserInput,
    /// The model side of the turn, if a response was produced.
    #[serde(default)]
    pub model_output: ModelOutput,
}

/// Body of `POST /analyze` at the ingestion gate.
///
/// Lenient by contract: absent fields decode to empty strings, unknown
/// fields are ignored. Only syntactically invalid JSON is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// Caller-assigned id for this turn.
    #[serde(default)]
    pub interaction_id: String,
    /// Conversation the turn belongs to.
    #[serde(default)]
    pub conversation_id: String,
    /// The prompt text to score.
    #[serde(default)]
    pub prompt: String,
    /// Optional caller metadata.
    #[serde(default)]
    pub user: UserMetadata,
}

/// Verdict returned by the ingestion gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Echo of the request's interaction id.
    pub interaction_id: String,
    /// Highest similarity score over all prompt chunks, 0 when the index
    /// returned no match.
    pub score: f32,
    /// Whether the score cleared the detection threshold.
    pub is_prompt_injection: bool,
}

/// Location of a judge output object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Bucket the object lives in.
    #[serde(default)]
    pub bucket: String,
    /// Object name within the bucket.
    #[serde(default)]
    pub file: String,
}

/// One judge output line, republished on the results topic.
///
/// `record` carries the judge line verbatim - the fan-out stage does not
/// interpret it, so schema drift in the provider's echo format cannot break
/// republication. The extractor navigates it via [`JudgeRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultEvent {
    /// Fresh unique id, also the bus partition key.
    #[serde(default)]
    pub event_id: String,
    /// When the fan-out produced this event.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// Which object the record came from.
    #[serde(default)]
    pub source: SourceRef,
    /// The full judge line.
    #[serde(default)]
    pub record: serde_json::Value,
}

/// A single text part inside judge request/response content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgePart {
    /// The text payload.
    #[serde(default)]
    pub text: String,
}

/// Ordered parts with an optional role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeContent {
    /// Speaker role, when present.
    #[serde(default)]
    pub role: String,
    /// The content parts.
    #[serde(default)]
    pub parts: Vec<JudgePart>,
}

/// One response candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeCandidate {
    /// The candidate's content.
    #[serde(default)]
    pub content: JudgeContent,
}

/// The echoed request half of a judge line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeEchoRequest {
    /// The request contents as submitted.
    #[serde(default)]
    pub contents: Vec<JudgeContent>,
}

/// The response half of a judge line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeEchoResponse {
    /// Generated candidates, best first.
    #[serde(default)]
    pub candidates: Vec<JudgeCandidate>,
}

/// Navigable view over a raw judge line.
///
/// Decoded from [`BatchResultEvent::record`]; every field is optional so a
/// structurally surprising line decodes to empty collections instead of
/// erroring, and the extractor's own validation decides what to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeRecord {
    /// Echo of the batch request.
    #[serde(default)]
    pub request: JudgeEchoRequest,
    /// The judge's response.
    #[serde(default)]
    pub response: JudgeEchoResponse,
}

impl JudgeRecord {
    /// The first candidate's first text part - the judge's verdict JSON.
    #[must_use]
    pub fn verdict_text(&self) -> Option<&str> {
        self.response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
    }

    /// The first request content's first text part - the submitted
    /// transcript prompt.
    #[must_use]
    pub fn transcript_text(&self) -> Option<&str> {
        self.request
            .contents
            .first()
            .and_then(|c| c.parts.first())
            .map(|p| p.text.as_str())
    }
}

/// Severity assigned by the judge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// No injection present.
    #[default]
    None,
    /// Low-severity attempt.
    Low,
    /// Medium-severity attempt.
    Medium,
    /// High-severity attempt.
    High,
}

/// Error raised when a verdict cannot be decoded from judge output.
#[derive(Debug, Error)]
#[error("failed to parse judge verdict: {source}; raw: {raw}")]
pub struct VerdictParseError {
    /// The underlying JSON error.
    #[source]
    pub source: serde_json::Error,
    /// The (fence-stripped) text that failed to parse.
    pub raw: String,
}

/// The judge's structured classification of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Whether any prompt injection was detected.
    pub is_prompt_injection: bool,
    /// Judge confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Worst severity observed.
    #[serde(default)]
    pub severity: Severity,
    /// Free-text explanation.
    #[serde(default)]
    pub analysis: String,
}

impl JudgeVerdict {
    /// Parses a verdict from raw judge output.
    ///
    /// Models occasionally wrap the JSON in markdown code fences despite
    /// instructions not to; a leading ```` ```json ````/```` ``` ```` and a
    /// trailing ```` ``` ```` are stripped before decoding, along with
    /// surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`VerdictParseError`] when the remaining text is not a valid
    /// verdict object.
    pub fn parse(raw: &str) -> Result<Self, VerdictParseError> {
        let mut text = raw.trim();
        text = text.strip_prefix("```json").unwrap_or(text);
        text = text.strip_prefix("```").unwrap_or(text);
        text = text.strip_suffix("```").unwrap_or(text);
        text = text.trim();

        serde_json::from_str(text).map_err(|source| VerdictParseError {
            source,
            raw: text.to_string(),
        })
    }
}

/// A single text part of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPart {
    /// The text payload.
    pub text: String,
}

/// One non-system message of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContent {
    /// Speaker role as given by the prompt template.
    pub role: String,
    /// The message body as a single text part.
    pub parts: Vec<RequestPart>,
}

/// Collected system messages of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInstruction {
    /// The joined system text as a single part.
    pub parts: Vec<RequestPart>,
}

/// The provider-shaped body of one batch prediction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestBody {
    /// Conversation messages in template order.
    pub contents: Vec<RequestContent>,
    /// Joined system messages, when the template has any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
}

impl BatchRequestBody {
    /// Builds a request body from rendered prompt messages.
    ///
    /// Messages with role `system` are collected and joined with `\n` into a
    /// single system instruction; every other message becomes one content
    /// entry with a single text part, preserving order.
    #[must_use]
    pub fn from_messages(messages: &[PromptMessage]) -> Self {
        let mut contents = Vec::new();
        let mut system_parts: Vec<&str> = Vec::new();

        for msg in messages {
            if msg.role == "system" {
                system_parts.push(&msg.content);
                continue;
            }
            contents.push(RequestContent {
                role: msg.role.clone(),
                parts: vec![RequestPart {
                    text: msg.content.clone(),
                }],
            });
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(SystemInstruction {
                parts: vec![RequestPart {
                    text: system_parts.join("\n"),
                }],
            })
        };

        Self {
            contents,
            system_instruction,
        }
    }
}

/// One line of a batch prediction input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestLine {
    /// The wrapped request body.
    pub request: BatchRequestBody,
}

impl BatchRequestLine {
    /// Serializes the line as newline-terminated JSONL bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_jsonl(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_event_roundtrip() {
        let event = InteractionEvent {
            interaction_id: "i-1".to_string(),
            conversation_id: "c-1".to_string(),
            timestamp: Utc::now(),
            role: Role::User,
            content: "hello".to_string(),
        };

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: InteractionEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_interaction_event_lenient_decode() {
        let decoded: InteractionEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(decoded.interaction_id, "");
        assert_eq!(decoded.conversation_id, "");
        assert_eq!(decoded.role, Role::User);
        assert!(decoded.has_zero_timestamp());
    }

    #[test]
    fn test_analyze_request_ignores_unknown_fields() {
        let decoded: AnalyzeRequest = serde_json::from_str(
            r#"{"interaction_id":"a","conversation_id":"c","prompt":"p","extra":42}"#,
        )
        .unwrap();
        assert_eq!(decoded.interaction_id, "a");
        assert_eq!(decoded.prompt, "p");
        assert_eq!(decoded.user.user_id, "");
    }

    #[test]
    fn test_jsonl_stream_preserves_record_count() {
        let mut data = Vec::new();
        for i in 0..5 {
            let event = InteractionEvent {
                interaction_id: format!("i-{i}"),
                conversation_id: "c".to_string(),
                timestamp: Utc::now(),
                role: Role::User,
                content: format!("turn {i}"),
            };
            data.extend_from_slice(&serde_json::to_vec(&event).unwrap());
            data.push(b'\n');
        }

        let records: Vec<InteractionEvent> = data
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].interaction_id, "i-4");
    }

    #[test]
    fn test_verdict_parse_plain() {
        let verdict = JudgeVerdict::parse(
            r#"{"is_prompt_injection":true,"confidence":0.9,"severity":"HIGH","analysis":"bad"}"#,
        )
        .unwrap();
        assert!(verdict.is_prompt_injection);
        assert_eq!(verdict.severity, Severity::High);
        assert!((verdict.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verdict_parse_strips_code_fences() {
        let raw = "```json\n{\"is_prompt_injection\": false, \"severity\": \"NONE\"}\n```";
        let verdict = JudgeVerdict::parse(raw).unwrap();
        assert!(!verdict.is_prompt_injection);
        assert_eq!(verdict.severity, Severity::None);
    }

    #[test]
    fn test_verdict_parse_bare_fence_and_whitespace() {
        let raw = "  ```\n  {\"is_prompt_injection\": true}  \n```  ";
        let verdict = JudgeVerdict::parse(raw).unwrap();
        assert!(verdict.is_prompt_injection);
    }

    #[test]
    fn test_verdict_parse_garbage_fails() {
        let err = JudgeVerdict::parse("the model said no").unwrap_err();
        assert!(err.raw.contains("the model said no"));
    }

    #[test]
    fn test_judge_record_navigation() {
        let line = serde_json::json!({
            "request": {"contents": [{"role": "user", "parts": [{"text": "transcript"}]}]},
            "response": {"candidates": [{"content": {"parts": [{"text": "{}"}]}}]},
            "usageMetadata": {"totalTokenCount": 12}
        });
        let record: JudgeRecord = serde_json::from_value(line).unwrap();
        assert_eq!(record.transcript_text(), Some("transcript"));
        assert_eq!(record.verdict_text(), Some("{}"));
    }

    #[test]
    fn test_judge_record_missing_fields() {
        let record: JudgeRecord = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(record.verdict_text(), None);
        assert_eq!(record.transcript_text(), None);
    }

    #[test]
    fn test_batch_request_collects_system_messages() {
        let messages = vec![
            PromptMessage {
                role: "system".to_string(),
                content: "first rule".to_string(),
            },
            PromptMessage {
                role: "user".to_string(),
                content: "the transcript".to_string(),
            },
            PromptMessage {
                role: "system".to_string(),
                content: "second rule".to_string(),
            },
        ];

        let body = BatchRequestBody::from_messages(&messages);
        assert_eq!(body.contents.len(), 1);
        assert_eq!(body.contents[0].role, "user");
        let system = body.system_instruction.unwrap();
        assert_eq!(system.parts[0].text, "first rule\nsecond rule");
    }

    #[test]
    fn test_batch_request_omits_empty_system_instruction() {
        let messages = vec![PromptMessage {
            role: "user".to_string(),
            content: "hello".to_string(),
        }];
        let line = BatchRequestLine {
            request: BatchRequestBody::from_messages(&messages),
        };
        let bytes = line.to_jsonl().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with('\n'));
        assert!(!text.contains("system_instruction"));
    }
}
