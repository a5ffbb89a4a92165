//! Tool definitions and capability schemas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::result::ValidationError;

/// Version assigned to definitions registered without one
pub const DEFAULT_TOOL_VERSION: &str = "1.0.0";

/// Category assigned to definitions registered without one
pub const DEFAULT_CATEGORY: &str = "general";

/// Lifecycle state of a registered tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Catalogued, initialization pending
    #[default]
    Registered,
    /// Initialized and accepting executions
    Ready,
    /// Executing (reserved for executors that report occupancy)
    Busy,
    /// Failed initialization, health check or execution
    Error,
    /// Switched off by an operator
    Disabled,
    /// Stopped during removal
    Stopped,
}

impl ToolStatus {
    /// Whether the tool may be executed
    pub fn is_ready(&self) -> bool {
        matches!(self, ToolStatus::Ready)
    }

    /// Whether the health sweep considers this tool
    pub fn is_health_checked(&self) -> bool {
        matches!(self, ToolStatus::Ready | ToolStatus::Error)
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolStatus::Registered => "registered",
            ToolStatus::Ready => "ready",
            ToolStatus::Busy => "busy",
            ToolStatus::Error => "error",
            ToolStatus::Disabled => "disabled",
            ToolStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A named parameter accepted by a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityParameter {
    /// Parameter name
    pub name: String,

    /// JSON type name (`string`, `number`, `integer`, `boolean`, `array`,
    /// `object`, `any`)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Whether callers must supply it
    #[serde(default)]
    pub required: bool,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Allowed values
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Value used when the caller omits the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl CapabilityParameter {
    /// Create a required parameter
    pub fn required(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: true,
            description: String::new(),
            enum_values: None,
            default: None,
        }
    }

    /// Create an optional parameter
    pub fn optional(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enum<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn type_matches(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            // unknown type names are not enforced
            _ => true,
        }
    }
}

/// Something a tool can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Capability name, used by capability search and request routing
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Accepted parameters
    #[serde(default)]
    pub parameters: Vec<CapabilityParameter>,

    /// Shape of the returned value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl ToolCapability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            return_type: None,
        }
    }

    pub fn with_parameter(mut self, parameter: CapabilityParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }

    /// Check `params` against the declared parameters and fill in defaults.
    ///
    /// Every violation is collected, so callers see all of them at once.
    pub fn prepare_parameters(
        &self,
        params: &mut Map<String, Value>,
    ) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for param in &self.parameters {
            match params.get(&param.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &param.default {
                        params.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        errors.push(
                            ValidationError::new(
                                &param.name,
                                format!("'{}' is required", param.name),
                            )
                            .with_code("MISSING_PARAMETER"),
                        );
                    }
                }
                Some(value) => {
                    if !param.type_matches(value) {
                        errors.push(
                            ValidationError::new(
                                &param.name,
                                format!("'{}' must be of type {}", param.name, param.param_type),
                            )
                            .with_code("TYPE_MISMATCH"),
                        );
                    } else if let Some(allowed) = &param.enum_values
                        && !allowed.contains(value)
                    {
                        errors.push(
                            ValidationError::new(
                                &param.name,
                                format!("'{}' must be one of {:?}", param.name, allowed),
                            )
                            .with_code("INVALID_ENUM_VALUE"),
                        );
                    }
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// A registrable tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Globally unique name
    pub name: String,

    /// Name shown to humans
    #[serde(default)]
    pub display_name: String,

    /// Semantic version
    #[serde(default)]
    pub version: String,

    /// What the tool does
    pub description: String,

    /// Grouping used by category search
    #[serde(default)]
    pub category: String,

    /// Where the executor finds the implementation
    pub entry_point: String,

    #[serde(default)]
    pub capabilities: Vec<ToolCapability>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Per-tool execution timeout
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Names of tools that must run before this one in a plan
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub status: ToolStatus,

    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ToolDefinition {
    /// Create a definition with the three mandatory fields
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            display_name: name.clone(),
            name,
            version: DEFAULT_TOOL_VERSION.to_string(),
            description: description.into(),
            category: DEFAULT_CATEGORY.to_string(),
            entry_point: entry_point.into(),
            capabilities: Vec::new(),
            tags: Vec::new(),
            timeout: None,
            dependencies: Vec::new(),
            status: ToolStatus::Registered,
            registered_at: now,
            updated_at: now,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_capability(mut self, capability: ToolCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Look up a capability by name
    pub fn capability(&self, name: &str) -> Option<&ToolCapability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Lowercased `name + " " + description`, the haystack for text search
    pub fn search_text(&self) -> String {
        format!("{} {}", self.name, self.description).to_lowercase()
    }

    /// Problems that prevent registration. Empty when the definition is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            problems.push("description must not be empty".to_string());
        }
        if self.entry_point.trim().is_empty() {
            problems.push("entry_point must not be empty".to_string());
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            problems.push(format!("'{}' cannot depend on itself", self.name));
        }
        problems
    }

    /// Fill blank optional fields
    pub(crate) fn normalize(&mut self) {
        if self.version.trim().is_empty() {
            self.version = DEFAULT_TOOL_VERSION.to_string();
        }
        if self.display_name.trim().is_empty() {
            self.display_name = self.name.clone();
        }
        if self.category.trim().is_empty() {
            self.category = DEFAULT_CATEGORY.to_string();
        }
    }
}

/// Partial update merged over an existing definition.
///
/// `None` leaves the field unchanged. The name is never updated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolUpdate {
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub entry_point: Option<String>,
    pub capabilities: Option<Vec<ToolCapability>>,
    pub tags: Option<Vec<String>>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub dependencies: Option<Vec<String>>,
}

impl ToolUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<ToolCapability>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Produce the merged definition. Status is reset to `Registered` and
    /// `updated_at` is refreshed; `name` and `registered_at` are preserved.
    pub fn apply(&self, base: &ToolDefinition) -> ToolDefinition {
        let mut merged = base.clone();
        if let Some(v) = &self.display_name {
            merged.display_name = v.clone();
        }
        if let Some(v) = &self.version {
            merged.version = v.clone();
        }
        if let Some(v) = &self.description {
            merged.description = v.clone();
        }
        if let Some(v) = &self.category {
            merged.category = v.clone();
        }
        if let Some(v) = &self.entry_point {
            merged.entry_point = v.clone();
        }
        if let Some(v) = &self.capabilities {
            merged.capabilities = v.clone();
        }
        if let Some(v) = &self.tags {
            merged.tags = v.clone();
        }
        if self.timeout.is_some() {
            merged.timeout = self.timeout;
        }
        if let Some(v) = &self.dependencies {
            merged.dependencies = v.clone();
        }
        merged.status = ToolStatus::Registered;
        merged.updated_at = Utc::now();
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn processor() -> ToolCapability {
        ToolCapability::new("process_text", "Process text content")
            .with_parameter(CapabilityParameter::required("text", "string"))
            .with_parameter(
                CapabilityParameter::required("operation", "string")
                    .with_enum(["summarize", "analyze"]),
            )
            .with_parameter(CapabilityParameter::optional("limit", "integer").with_default(10))
    }

    #[test]
    fn test_validate_reports_each_missing_field() {
        let def = ToolDefinition::new("", " ", "");
        assert_eq!(def.validate().len(), 3);

        let ok = ToolDefinition::new("a", "does a", "./a");
        assert!(ok.validate().is_empty());
    }

    #[test]
    fn test_normalize_fills_blank_version() {
        let mut def = ToolDefinition::new("a", "does a", "./a").with_version("");
        def.display_name.clear();
        def.normalize();
        assert_eq!(def.version, DEFAULT_TOOL_VERSION);
        assert_eq!(def.display_name, "a");
    }

    #[test]
    fn test_prepare_parameters_fills_defaults() {
        let mut params = json!({"text": "hi", "operation": "analyze"})
            .as_object()
            .cloned()
            .unwrap();
        processor().prepare_parameters(&mut params).unwrap();
        assert_eq!(params["limit"], json!(10));
    }

    #[test]
    fn test_prepare_parameters_collects_violations() {
        let mut params = json!({"operation": "translate", "limit": "ten"})
            .as_object()
            .cloned()
            .unwrap();
        let errors = processor().prepare_parameters(&mut params).unwrap_err();

        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["text", "operation", "limit"]);
        assert_eq!(errors[1].code.as_deref(), Some("INVALID_ENUM_VALUE"));
    }

    #[test]
    fn test_update_preserves_identity() {
        let base = ToolDefinition::new("a", "old", "./a").with_tag("x");
        let merged = ToolUpdate::new()
            .description("new")
            .version("2.0.0")
            .apply(&base);

        assert_eq!(merged.name, "a");
        assert_eq!(merged.description, "new");
        assert_eq!(merged.version, "2.0.0");
        assert_eq!(merged.tags, vec!["x"]);
        assert_eq!(merged.registered_at, base.registered_at);
        assert_eq!(merged.status, ToolStatus::Registered);
    }

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let def: ToolDefinition = serde_json::from_value(json!({
            "name": "t",
            "description": "d",
            "entry_point": "./t",
            "timeout": "5s",
            "capabilities": [{
                "name": "c",
                "parameters": [{"name": "p", "type": "string", "enum": ["x"]}]
            }]
        }))
        .unwrap();

        assert_eq!(def.timeout, Some(Duration::from_secs(5)));
        assert_eq!(def.status, ToolStatus::Registered);
        assert_eq!(def.capabilities[0].parameters[0].param_type, "string");
        assert!(def.version.is_empty());
    }
}
