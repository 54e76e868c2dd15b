//! Shared helpers for built-in tool implementations, adapted from the
//! teacher's `tools::common` module (`create_schema`/`tool_config`-style
//! conveniences) to `conclave_core::tool`'s `ToolDefinition` shape.

use conclave_core::{ConclaveError, ConclaveResult, SideEffectClass, ToolDefinition};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Build a standard JSON-schema object for a tool's declared parameters.
pub fn create_schema(properties: serde_json::Value, required: Vec<&str>) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn tool_definition(
    name: &str,
    description: &str,
    parameters: serde_json::Value,
    side_effect_class: SideEffectClass,
) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
        side_effect_class,
    }
}

/// Pull a required, typed argument out of a tool call's JSON args,
/// failing with `kind=bad_request` (never a `panic`) if it is absent or
/// the wrong shape.
pub fn get_arg<T: DeserializeOwned>(args: &serde_json::Value, key: &str) -> ConclaveResult<T> {
    let value = args
        .get(key)
        .ok_or_else(|| ConclaveError::bad_request(format!("missing required argument {key:?}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| ConclaveError::bad_request(format!("argument {key:?} is invalid: {e}")))
}

/// Same as [`get_arg`], but returns `default` when the key is absent.
pub fn get_arg_or<T: DeserializeOwned>(args: &serde_json::Value, key: &str, default: T) -> ConclaveResult<T> {
    match args.get(key) {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ConclaveError::bad_request(format!("argument {key:?} is invalid: {e}"))),
        None => Ok(default),
    }
}

/// Structured output of an argv-array command invocation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Spawn `program` with the given argv (never a shell string) and collect
/// its output, bounded by `timeout_secs`.
pub async fn execute_command(
    program: &str,
    args: &[String],
    working_dir: Option<&str>,
    timeout_secs: u64,
) -> ConclaveResult<CommandOutput> {
    use tokio::process::Command;

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd
        .spawn()
        .map_err(|e| ConclaveError::configuration_error(format!("failed to spawn {program}: {e}")))?;

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| ConclaveError::timeout(format!("{program} timed out after {timeout_secs}s")))?
        .map_err(|e| ConclaveError::transient(format!("{program} failed: {e}")))?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    })
}
