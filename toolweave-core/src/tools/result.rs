//! Execution requests, result envelopes and the tool error model
//!
//! Executor failures never escape the registry as Rust errors. They are
//! captured as a [`ToolError`] inside a failed [`ExecutionResult`], with a
//! kind that tells callers whether retrying could help.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Caller-supplied context for a single execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Session to attribute the call to (generated when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Arguments for the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,

    /// Opaque caller metadata, passed through to the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Request to run one tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub tool_name: String,

    #[serde(default)]
    pub context: RequestContext,

    /// Capability to invoke; enables parameter validation against its schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,

    /// Overrides the tool's own timeout
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_millis"
    )]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            context: RequestContext::default(),
            capability: None,
            timeout: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.context.parameters = Some(parameters);
        self
    }

    /// Set parameters from a JSON object. Non-object values are ignored.
    pub fn with_params(self, parameters: Value) -> Self {
        match parameters {
            Value::Object(map) => self.with_parameters(map),
            _ => self,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.context.metadata = Some(metadata);
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Context handed to a [`ToolExecutor`](super::ToolExecutor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    /// Unique per execution
    pub execution_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub capability: Option<String>,
    /// Validated parameters, with declared defaults filled in
    pub parameters: Map<String, Value>,
    pub metadata: Map<String, Value>,
    /// Advisory; the registry does not enforce it
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
}

/// Outcome of one tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    pub execution_time_ms: u64,

    pub timestamp: DateTime<Utc>,

    /// Execution id, tool version, session and a fingerprint of the parameters
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    pub fn success(data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn failure(error: ToolError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            execution_time_ms,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Message of the captured error, if any
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Check if the failure may succeed on retry
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind.is_retryable())
    }
}

/// Short SHA-256 fingerprint of a parameter set, stable for equal input
pub fn parameters_fingerprint(parameters: &Map<String, Value>) -> String {
    let json = serde_json::to_string(parameters).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

/// Why a tool execution failed.
///
/// `kind` drives both retry advice and whether the tool is marked `Error`;
/// `details` carries structured data such as per-parameter violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Machine-readable code, e.g. `VALIDATION_FAILED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Parameters were rejected before the executor ran
    pub fn validation(errors: Vec<ValidationError>) -> Self {
        let summary = errors
            .iter()
            .map(ValidationError::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let details = serde_json::to_value(&errors).unwrap_or_default();
        Self::new(ToolErrorKind::Validation, format!("Validation failed: {summary}"))
            .with_code("VALIDATION_FAILED")
            .with_details(details)
    }

    /// The executor exceeded its advisory timeout
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("Tool execution timed out after {}ms", after.as_millis()),
        )
        .with_code("TIMEOUT")
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Transient, message).with_code("TRANSIENT")
    }

    /// Unknown entry point or missing resource
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message).with_code("NOT_FOUND")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message).with_code("INTERNAL_ERROR")
    }

    /// Whether the failure should put the tool into `Error` status
    pub fn is_tool_fault(&self) -> bool {
        !matches!(self.kind, ToolErrorKind::Validation | ToolErrorKind::Cancelled)
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

/// Failure classes an executor can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Bad parameters; the caller must change the request
    Validation,
    Timeout,
    /// Upstream throttling
    RateLimited,
    /// Temporary failure of a dependency
    Transient,
    NotFound,
    PermissionDenied,
    /// Bug or unexpected state inside the tool
    Internal,
    Cancelled,
}

impl ToolErrorKind {
    /// Whether the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::Timeout | ToolErrorKind::RateLimited | ToolErrorKind::Transient
        )
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolErrorKind::Validation => "validation",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::RateLimited => "rate_limited",
            ToolErrorKind::Transient => "transient",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::PermissionDenied => "permission_denied",
            ToolErrorKind::Internal => "internal",
            ToolErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One rejected parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Parameter name
    pub field: String,
    pub message: String,
    /// `MISSING_PARAMETER`, `TYPE_MISMATCH`, `INVALID_ENUM_VALUE` or
    /// `UNKNOWN_CAPABILITY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// durations travel as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod result_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_envelope() {
        let result = ExecutionResult::failure(ToolError::timeout(Duration::from_secs(30)), 12);

        assert!(!result.success);
        assert!(result.data.is_none());
        assert!(result.is_retryable());
        assert!(result.error_message().unwrap().contains("timed out"));
    }

    #[test]
    fn test_error_kind_retryability() {
        assert!(ToolErrorKind::Timeout.is_retryable());
        assert!(ToolErrorKind::RateLimited.is_retryable());
        assert!(ToolErrorKind::Transient.is_retryable());

        assert!(!ToolErrorKind::Validation.is_retryable());
        assert!(!ToolErrorKind::Internal.is_retryable());
    }

    #[test]
    fn test_validation_is_not_a_tool_fault() {
        let error = ToolError::validation(vec![ValidationError::new("text", "text is required")]);
        assert!(!error.is_tool_fault());
        assert!(ToolError::internal("boom").is_tool_fault());
    }

    #[test]
    fn test_validation_error() {
        let errors = vec![
            ValidationError::new("url", "URL is required"),
            ValidationError::new("timeout", "Must be positive"),
        ];
        let error = ToolError::validation(errors);

        assert_eq!(error.kind, ToolErrorKind::Validation);
        assert_eq!(
            error.message,
            "Validation failed: url: URL is required; timeout: Must be positive"
        );
        assert_eq!(error.details.as_ref().map(|d| d[1]["field"].clone()), Some(json!("timeout")));
        assert_eq!(error.to_string(), format!("validation: {}", error.message));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = json!({"x": 1, "y": "z"}).as_object().cloned().unwrap();
        let b = json!({"x": 1, "y": "z"}).as_object().cloned().unwrap();
        let c = json!({"x": 2}).as_object().cloned().unwrap();

        assert_eq!(parameters_fingerprint(&a), parameters_fingerprint(&b));
        assert_ne!(parameters_fingerprint(&a), parameters_fingerprint(&c));
        assert_eq!(parameters_fingerprint(&a).len(), 16);
    }

    #[test]
    fn test_request_round_trip() {
        let request = ExecutionRequest::new("text-processor")
            .with_params(json!({"text": "hello"}))
            .with_user_id("u1")
            .with_timeout(Duration::from_millis(1500));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["timeout"], json!(1500));

        let parsed: ExecutionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.context.user_id.as_deref(), Some("u1"));
        assert_eq!(parsed.timeout, Some(Duration::from_millis(1500)));
    }
}
