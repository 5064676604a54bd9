//! Prompt templates and system-prompt assembly
//!
//! Templates render with handlebars in strict mode, so a referenced slot
//! with no value (notably `memory_context`) is a hard template error. The
//! assembled system prompt carries two implicit slots: `tools` (rendered
//! from the registry declarations) and `output_format_str` (rendered from
//! the declared output schema).

use handlebars::Handlebars;
use schemars::gen::SchemaGenerator;
use schemars::JsonSchema;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tools::ToolRegistry;

/// Keyword arguments supplied to a template render
pub type PromptKwargs = Map<String, Value>;

/// Frame wrapped around every assembled system prompt
const BASE_PROMPT: &str = "\
{{body}}
{{#if tools}}

You can call the following tools. To use one or more tools, include a \
`tool_calls` list of {name, arguments} records in your response; their \
outputs will be returned to you on the next turn.
<TOOLS>
{{tools}}
</TOOLS>
{{/if}}

Your entire reply must be a single JSON object conforming to this schema:
<OUTPUT_FORMAT>
{{output_format_str}}
</OUTPUT_FORMAT>";

/// A system prompt template with a declared output schema
#[derive(Debug, Clone, Default)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    /// Create a template from raw handlebars text
    pub fn new(text: impl Into<String>) -> Self {
        PromptTemplate { text: text.into() }
    }

    /// Template source text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render only the template body with the given kwargs
    pub fn render(&self, kwargs: &PromptKwargs) -> Result<String> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        Ok(registry.render_template(&self.text, kwargs)?)
    }

    /// Assemble the full system prompt: rendered body, tool declarations,
    /// and the output format section for schema `T`.
    pub fn build<T: JsonSchema>(
        &self,
        kwargs: &PromptKwargs,
        tools: Option<&ToolRegistry>,
    ) -> Result<String> {
        let body = self.render(kwargs)?;

        let rendered_tools = match tools {
            Some(registry) if !registry.is_empty() => {
                serde_json::to_string_pretty(&registry.specs())?
            }
            _ => String::new(),
        };

        let mut frame_data = PromptKwargs::new();
        frame_data.insert("body".into(), Value::String(body));
        frame_data.insert("tools".into(), Value::String(rendered_tools));
        frame_data.insert(
            "output_format_str".into(),
            Value::String(schema_string::<T>()),
        );

        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        Ok(registry.render_template(BASE_PROMPT, &frame_data)?)
    }
}

/// Pretty-printed JSON Schema for `T`
pub fn schema_string<T: JsonSchema>() -> String {
    let schema = SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

/// Schema identifier for `T`, used for cache fingerprints and decode errors
pub fn schema_name<T: JsonSchema>() -> String {
    T::schema_name()
}
