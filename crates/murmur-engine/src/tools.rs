//! Tools reminder — a short section listing the host's LLM tools so the
//! model remembers what it can call mid-conversation.

use murmur_core::host::{ToolRegistry, ToolSpec};
use murmur_history::markers::{TOOLS_FOOTER, TOOLS_HEADER};

/// Append the available-tools section to `prompt`. Idempotent; a prompt
/// that already carries the section (or an empty registry) passes through.
pub fn inject_tools(prompt: &str, registry: &dyn ToolRegistry) -> String {
    if prompt.contains(TOOLS_HEADER) {
        return prompt.to_string();
    }
    let tools = registry.tools();
    if tools.is_empty() {
        return prompt.to_string();
    }
    format!("{prompt}\n\n{}", format_tools(&tools))
}

fn format_tools(tools: &[ToolSpec]) -> String {
    let mut out = String::from(TOOLS_HEADER);
    for tool in tools {
        out.push_str(&format!("\n- {}: {}", tool.name, tool.description));
        if let Some(params) = parameter_names(tool) {
            out.push_str(&format!(" (parameters: {params})"));
        }
    }
    out.push('\n');
    out.push_str(TOOLS_FOOTER);
    out
}

/// Parameter names from a JSON-schema-shaped `parameters` object.
fn parameter_names(tool: &ToolSpec) -> Option<String> {
    let properties = tool.parameters.get("properties")?.as_object()?;
    if properties.is_empty() {
        return None;
    }
    let mut names: Vec<&str> = properties.keys().map(|k| k.as_str()).collect();
    names.sort_unstable();
    Some(names.join(", "))
}
