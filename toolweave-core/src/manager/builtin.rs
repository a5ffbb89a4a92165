//! Built-in tool definitions seeded by the manager
//!
//! These describe the tools only. Running them is up to whatever
//! [`ToolExecutor`](crate::tools::ToolExecutor) the manager was started with.

use crate::tools::{CapabilityParameter, ToolCapability, ToolDefinition};

pub const TEXT_PROCESSOR: &str = "text-processor";
pub const DATA_ANALYZER: &str = "data-analyzer";
pub const PREDICTION_ENGINE: &str = "prediction-engine";
pub const COMMUNICATION: &str = "communication";

/// Names of the built-in tools, in seeding order
pub const BUILTIN_TOOL_NAMES: [&str; 4] =
    [TEXT_PROCESSOR, DATA_ANALYZER, PREDICTION_ENGINE, COMMUNICATION];

/// The full built-in tool set
pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        text_processor(),
        data_analyzer(),
        prediction_engine(),
        communication(),
    ]
}

fn text_processor() -> ToolDefinition {
    ToolDefinition::new(
        TEXT_PROCESSOR,
        "Process and analyze text content",
        "./tools/text-processor",
    )
    .with_display_name("Text Processor")
    .with_category("text")
    .with_tags(["text", "nlp", "processing"])
    .with_capability(
        ToolCapability::new("process_text", "Process text content")
            .with_parameter(
                CapabilityParameter::required("text", "string")
                    .with_description("Text to process"),
            )
            .with_parameter(
                CapabilityParameter::required("operation", "string")
                    .with_description("Processing operation")
                    .with_enum(["summarize", "analyze", "translate", "extract"]),
            )
            .with_return_type("object"),
    )
}

fn data_analyzer() -> ToolDefinition {
    ToolDefinition::new(
        DATA_ANALYZER,
        "Analyze data and generate insights",
        "./tools/data-analyzer",
    )
    .with_display_name("Data Analyzer")
    .with_category("analysis")
    .with_tags(["data", "analytics", "statistics"])
    .with_capability(
        ToolCapability::new("analyze_data", "Analyze a dataset")
            .with_parameter(
                CapabilityParameter::required("data", "array").with_description("Data to analyze"),
            )
            .with_parameter(
                CapabilityParameter::required("analysis_type", "string")
                    .with_description("Kind of analysis")
                    .with_enum(["statistical", "trend", "correlation", "prediction"]),
            )
            .with_return_type("object"),
    )
}

fn prediction_engine() -> ToolDefinition {
    ToolDefinition::new(
        PREDICTION_ENGINE,
        "Run forecasting and prediction tasks",
        "./tools/prediction-engine",
    )
    .with_display_name("Prediction Engine")
    .with_category("prediction")
    .with_tags(["prediction", "forecasting", "ml"])
    .with_capability(
        ToolCapability::new("predict", "Produce a prediction")
            .with_parameter(
                CapabilityParameter::required("data", "array").with_description("Input series"),
            )
            .with_parameter(
                CapabilityParameter::required("model", "string")
                    .with_description("Prediction model"),
            )
            .with_parameter(
                CapabilityParameter::optional("horizon", "number")
                    .with_description("Prediction horizon")
                    .with_default(1),
            )
            .with_return_type("object"),
    )
}

fn communication() -> ToolDefinition {
    ToolDefinition::new(
        COMMUNICATION,
        "Handle outbound communication and notifications",
        "./tools/communication",
    )
    .with_display_name("Communication")
    .with_category("communication")
    .with_tags(["notification", "email", "webhook"])
    .with_capability(
        ToolCapability::new("send_notification", "Send a notification")
            .with_parameter(
                CapabilityParameter::required("recipient", "string").with_description("Recipient"),
            )
            .with_parameter(
                CapabilityParameter::required("message", "string")
                    .with_description("Notification body"),
            )
            .with_parameter(
                CapabilityParameter::required("channel", "string")
                    .with_description("Delivery channel")
                    .with_enum(["email", "sms", "webhook", "push"]),
            )
            .with_return_type("boolean"),
    )
}
