use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::Tool;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Read a file, expanding `~` and environment variables in its path
pub fn load_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.into();
    let expanded = shellexpand::full(&template_path.to_string_lossy())
        .map_err(|e| TeraError::chain("Failed to expand template path", e))?
        .into_owned();

    let template_content = fs::read_to_string(expanded)
        .map_err(|e| TeraError::chain("Failed to read template file", e))?;
    load_prompt(&template_content, context_data)
}

#[derive(Serialize)]
struct ToolSummary<'a> {
    name: &'a str,
    summary: &'a str,
}

#[derive(Serialize)]
struct SystemContext<'a> {
    instructions: &'a str,
    tools: Vec<ToolSummary<'a>>,
    max_tool_calls: usize,
    state: &'a Map<String, Value>,
}

/// Render the system prompt for one model turn from the agent's instructions,
/// the advertised tools and the thread's auxiliary state
pub fn render_system_prompt(
    instructions: &str,
    tools: &[Tool],
    max_tool_calls: usize,
    state: &Map<String, Value>,
) -> Result<String, TeraError> {
    let tools = tools
        .iter()
        .map(|tool| ToolSummary {
            name: &tool.name,
            summary: tool.description.lines().next().unwrap_or_default().trim(),
        })
        .collect();
    let context = SystemContext {
        instructions,
        tools,
        max_tool_calls,
        state,
    };
    Ok(load_prompt(SYSTEM_TEMPLATE, &context)?.trim().to_string())
}
