//! Hook entry points (spec.md §6). Never panic: every error is caught,
//! logged to stderr, and answered with a well-formed fallback JSON object so
//! the calling client is never blocked (spec.md §7 propagation policy).

use std::io::Read;

use cml_core::{MemoryConfig, MemoryService, MetaValue, RetrieveOptions, Strategy};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct UserPromptSubmitInput {
    session_id: String,
    prompt: String,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Deserialize)]
struct PostToolUseInput {
    session_id: String,
    tool_name: String,
    #[serde(default)]
    tool_input: serde_json::Value,
    #[serde(default)]
    tool_output: serde_json::Value,
    #[serde(default)]
    tool_error: Option<String>,
    started_at: String,
    ended_at: String,
}

fn read_stdin_json<T: for<'de> Deserialize<'de>>() -> anyhow::Result<T> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(serde_json::from_str(&buf)?)
}

fn service_for_cwd(cwd: Option<&str>) -> anyhow::Result<MemoryService> {
    let mut config = MemoryConfig::from_env();
    let project_path = cwd.map(str::to_string).unwrap_or_else(|| std::env::current_dir().map(|p| p.to_string_lossy().to_string()).unwrap_or_default());
    let project_id = cml_core::config::project_hash8(&project_path);
    if std::env::var("CML_DB_PATH").is_err() {
        if let Some(parent) = config.db_path.parent() {
            config.db_path = parent.join(&project_id).join("events.sqlite");
        }
    }
    Ok(MemoryService::new(config, project_id, std::env::var("CML_ENV").unwrap_or_else(|_| "dev".to_string()))?)
}

/// Returns the process exit code; always 0, per spec.md §6 "Exit codes" for
/// hook scripts (fatal failures degrade to an empty JSON response, not a
/// nonzero exit, since hooks must never block the calling client).
pub fn user_prompt_submit() -> i32 {
    match run_user_prompt_submit() {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "user-prompt-submit hook failed");
            println!("{}", json!({"context": ""}));
            0
        }
    }
}

fn run_user_prompt_submit() -> anyhow::Result<String> {
    let input: UserPromptSubmitInput = read_stdin_json()?;
    let service = service_for_cwd(input.cwd.as_deref())?;

    service.append("user_prompt", &input.session_id, None, None, &input.prompt, MetaValue::empty_map())?;

    let options = RetrieveOptions { top_k: 5, strategy: Some(Strategy::Hybrid), ..Default::default() };
    let result = service.retrieve(&input.prompt, options)?;

    let context = result
        .memories
        .iter()
        .map(|m| format!("- {}", m.event.content))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(json!({"context": context}).to_string())
}

pub fn post_tool_use() -> i32 {
    match run_post_tool_use() {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "post-tool-use hook failed");
            println!("{}", json!({}));
            0
        }
    }
}

fn run_post_tool_use() -> anyhow::Result<String> {
    let input: PostToolUseInput = read_stdin_json()?;
    let config = MemoryConfig::from_env();

    if config.excluded_tools.iter().any(|t| t == &input.tool_name) {
        return Ok(json!({}).to_string());
    }
    if config.store_only_on_success && input.tool_error.is_some() {
        return Ok(json!({}).to_string());
    }

    let service = service_for_cwd(None)?;

    let mut metadata = MetaValue::empty_map();
    metadata.set_path("tool.name", MetaValue::scalar(input.tool_name.clone()));
    metadata.set_path("tool.input", MetaValue::from_json(&input.tool_input));
    metadata.set_path("tool.output", MetaValue::from_json(&input.tool_output));
    metadata.set_path("tool.started_at", MetaValue::scalar(input.started_at.clone()));
    metadata.set_path("tool.ended_at", MetaValue::scalar(input.ended_at.clone()));
    if let Some(err) = &input.tool_error {
        metadata.set_path("tool.error", MetaValue::scalar(err.clone()));
    }

    let content = format!("{}: {}", input.tool_name, input.tool_output);
    service.append("tool_observation", &input.session_id, None, None, &content, metadata)?;

    Ok(json!({}).to_string())
}
