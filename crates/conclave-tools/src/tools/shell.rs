//! Shell command tool (spec.md §4.3), command-allowlisted. Invocation
//! is always an argv array via `tokio::process::Command` (grounded in
//! the teacher's argv-building convention), never a shell string;
//! arguments containing shell metacharacters are rejected by default
//! since they usually signal an injection attempt further upstream.

use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult, SideEffectClass, Tool, ToolDefinition, ToolInput, ToolResult};
use tracing::debug;

use super::common::{create_schema, execute_command, get_arg, get_arg_or, tool_definition};
use crate::policy::{contains_shell_metacharacters, ToolPolicy};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Execute an allowlisted command with an explicit argv array.
pub struct ShellTool {
    policy: ToolPolicy,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> ConclaveResult<Self> {
        Ok(Self {
            policy: ToolPolicy::new(allowed_commands)?,
        })
    }
}

#[async_trait]
impl Tool for ShellTool {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult> {
        let command: String = get_arg(&input.args, "command")?;
        let args: Vec<String> = get_arg_or(&input.args, "args", Vec::new())?;
        let working_dir: Option<String> = input.args.get("working_dir").and_then(|v| v.as_str()).map(String::from);
        let timeout_secs: u64 = get_arg_or(&input.args, "timeout_secs", DEFAULT_TIMEOUT_SECS)?;

        self.policy.check_exact(&command).into_result()?;

        if which::which(&command).is_err() {
            return Err(ConclaveError::configuration_error(format!(
                "command {command:?} was not found on PATH"
            )));
        }

        for arg in &args {
            if contains_shell_metacharacters(arg) {
                return Err(ConclaveError::policy_denied(format!(
                    "argument {arg:?} contains shell metacharacters and is rejected"
                )));
            }
        }

        debug!(command = %command, args = ?args, "executing shell command");
        let output = execute_command(&command, &args, working_dir.as_deref(), timeout_secs).await?;

        if output.success {
            Ok(ToolResult::success(output.to_json()))
        } else {
            Ok(ToolResult::failure(format!(
                "command exited with status {}: {}",
                output.exit_code, output.stderr
            )))
        }
    }

    fn definition(&self) -> ToolDefinition {
        tool_definition(
            "run_shell_command",
            "Execute an allowlisted command with an explicit argument array.",
            create_schema(
                serde_json::json!({
                    "command": {"type": "string", "description": "Allowlisted command name"},
                    "args": {"type": "array", "items": {"type": "string"}, "description": "Argument array"},
                    "working_dir": {"type": "string", "description": "Working directory"},
                    "timeout_secs": {"type": "integer", "description": "Timeout in seconds"},
                }),
                vec!["command"],
            ),
            SideEffectClass::External,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_without_allowlist_is_configuration_error() {
        let err = ShellTool::new(vec![]).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[tokio::test]
    async fn command_outside_allowlist_is_policy_denied() {
        let tool = ShellTool::new(vec!["echo".into()]).unwrap();
        let err = tool
            .execute(ToolInput::new(serde_json::json!({
                "command": "rm",
                "args": ["-rf", "/"],
            })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "policy_denied");
    }

    #[tokio::test]
    async fn metacharacter_in_argument_is_rejected() {
        let tool = ShellTool::new(vec!["echo".into()]).unwrap();
        let err = tool
            .execute(ToolInput::new(serde_json::json!({
                "command": "echo",
                "args": ["hello; rm -rf /"],
            })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "policy_denied");
    }

    #[tokio::test]
    async fn allowlisted_command_runs() {
        let tool = ShellTool::new(vec!["echo".into()]).unwrap();
        let result = tool
            .execute(ToolInput::new(serde_json::json!({
                "command": "echo",
                "args": ["hello"],
            })))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output["stdout"].as_str().unwrap().contains("hello"));
    }
}
