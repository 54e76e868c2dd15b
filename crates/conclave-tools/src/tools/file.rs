//! Filesystem tools (spec.md §4.3), path-allowlisted. Grounded in
//! `aof-tools/src/tools/file.rs`'s `ReadFileTool`/`WriteFileTool`/
//! `ListDirTool`, with a construction-time [`ToolPolicy`] checked ahead
//! of every filesystem access.

use std::path::Path;

use async_trait::async_trait;
use conclave_core::{ConclaveResult, SideEffectClass, Tool, ToolDefinition, ToolInput, ToolResult};
use tokio::fs;
use tracing::debug;

use super::common::{create_schema, get_arg, get_arg_or, tool_definition};
use crate::policy::ToolPolicy;

const DEFAULT_MAX_READ_BYTES: usize = 1_048_576;

/// Read the contents of a file under an allowlisted directory.
pub struct FileReadTool {
    policy: ToolPolicy,
}

impl FileReadTool {
    pub fn new(allowed_paths: Vec<String>) -> ConclaveResult<Self> {
        Ok(Self {
            policy: ToolPolicy::new(allowed_paths)?,
        })
    }
}

#[async_trait]
impl Tool for FileReadTool {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult> {
        let path: String = get_arg(&input.args, "path")?;
        let max_bytes: usize = get_arg_or(&input.args, "max_bytes", DEFAULT_MAX_READ_BYTES)?;
        let path = Path::new(&path);

        self.policy.check_path(path).into_result()?;

        debug!(path = %path.display(), "reading file");
        if !path.exists() {
            return Ok(ToolResult::failure(format!("file not found: {}", path.display())));
        }

        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(e) => return Ok(ToolResult::failure(format!("failed to read file: {e}"))),
        };
        let truncated = bytes.len() > max_bytes;
        let content = String::from_utf8_lossy(&bytes[..bytes.len().min(max_bytes)]).to_string();

        Ok(ToolResult::success(serde_json::json!({
            "path": path.display().to_string(),
            "content": content,
            "size": bytes.len(),
            "truncated": truncated,
        })))
    }

    fn definition(&self) -> ToolDefinition {
        tool_definition(
            "read_file",
            "Read the contents of a file under an allowlisted directory.",
            create_schema(
                serde_json::json!({
                    "path": {"type": "string", "description": "Path to the file to read"},
                    "max_bytes": {"type": "integer", "description": "Maximum bytes to read"},
                }),
                vec!["path"],
            ),
            SideEffectClass::Read,
        )
    }
}

/// Write content to a file under an allowlisted directory.
pub struct FileWriteTool {
    policy: ToolPolicy,
}

impl FileWriteTool {
    pub fn new(allowed_paths: Vec<String>) -> ConclaveResult<Self> {
        Ok(Self {
            policy: ToolPolicy::new(allowed_paths)?,
        })
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult> {
        let path: String = get_arg(&input.args, "path")?;
        let content: String = get_arg(&input.args, "content")?;
        let append: bool = get_arg_or(&input.args, "append", false)?;
        let create_dirs: bool = get_arg_or(&input.args, "create_dirs", true)?;
        let path = Path::new(&path);

        self.policy.check_path(path).into_result()?;

        if create_dirs {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && fs::metadata(parent).await.is_err() {
                    if let Err(e) = fs::create_dir_all(parent).await {
                        return Ok(ToolResult::failure(format!("failed to create directories: {e}")));
                    }
                }
            }
        }

        let write_result = if append {
            use tokio::io::AsyncWriteExt;
            match fs::OpenOptions::new().create(true).append(true).open(path).await {
                Ok(mut f) => f.write_all(content.as_bytes()).await,
                Err(e) => return Ok(ToolResult::failure(format!("failed to open file: {e}"))),
            }
        } else {
            fs::write(path, &content).await
        };

        match write_result {
            Ok(()) => Ok(ToolResult::success(serde_json::json!({
                "path": path.display().to_string(),
                "bytes_written": content.len(),
                "appended": append,
            }))),
            Err(e) => Ok(ToolResult::failure(format!("failed to write file: {e}"))),
        }
    }

    fn definition(&self) -> ToolDefinition {
        tool_definition(
            "write_file",
            "Write content to a file under an allowlisted directory.",
            create_schema(
                serde_json::json!({
                    "path": {"type": "string", "description": "Path to the file to write"},
                    "content": {"type": "string", "description": "Content to write"},
                    "append": {"type": "boolean", "description": "Append instead of overwrite"},
                    "create_dirs": {"type": "boolean", "description": "Create parent directories"},
                }),
                vec!["path", "content"],
            ),
            SideEffectClass::Write,
        )
    }
}

/// List entries of a directory under an allowlisted path.
pub struct ListDirectoryTool {
    policy: ToolPolicy,
}

impl ListDirectoryTool {
    pub fn new(allowed_paths: Vec<String>) -> ConclaveResult<Self> {
        Ok(Self {
            policy: ToolPolicy::new(allowed_paths)?,
        })
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult> {
        let path: String = get_arg(&input.args, "path")?;
        let include_hidden: bool = get_arg_or(&input.args, "include_hidden", false)?;
        let path = Path::new(&path);

        self.policy.check_path(path).into_result()?;

        if !path.is_dir() {
            return Ok(ToolResult::failure(format!("not a directory: {}", path.display())));
        }

        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(path).await {
            Ok(d) => d,
            Err(e) => return Ok(ToolResult::failure(format!("failed to read directory: {e}"))),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await.ok();
            let kind = if metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false) {
                "directory"
            } else {
                "file"
            };
            entries.push(serde_json::json!({
                "name": name,
                "path": entry.path().display().to_string(),
                "type": kind,
                "size": metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            }));
        }

        Ok(ToolResult::success(serde_json::json!({
            "path": path.display().to_string(),
            "entries": entries,
            "count": entries.len(),
        })))
    }

    fn definition(&self) -> ToolDefinition {
        tool_definition(
            "list_directory",
            "List contents of a directory under an allowlisted path.",
            create_schema(
                serde_json::json!({
                    "path": {"type": "string", "description": "Path to the directory to list"},
                    "include_hidden": {"type": "boolean", "description": "Include hidden entries"},
                }),
                vec!["path"],
            ),
            SideEffectClass::Read,
        )
    }
}

/// Search filenames under an allowlisted directory against a regex.
pub struct SearchFilesTool {
    policy: ToolPolicy,
}

impl SearchFilesTool {
    pub fn new(allowed_paths: Vec<String>) -> ConclaveResult<Self> {
        Ok(Self {
            policy: ToolPolicy::new(allowed_paths)?,
        })
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult> {
        let path: String = get_arg(&input.args, "path")?;
        let pattern: String = get_arg(&input.args, "pattern")?;
        let path_buf = Path::new(&path);

        self.policy.check_path(path_buf).into_result()?;

        let regex = regex::Regex::new(&pattern)
            .map_err(|e| conclave_core::ConclaveError::bad_request(format!("invalid pattern: {e}")))?;

        let mut matches = Vec::new();
        let mut stack = vec![path_buf.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut read = match fs::read_dir(&dir).await {
                Ok(r) => r,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = read.next_entry().await {
                let entry_path = entry.path();
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    stack.push(entry_path);
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if regex.is_match(&name) {
                    matches.push(entry_path.display().to_string());
                }
            }
        }

        Ok(ToolResult::success(serde_json::json!({
            "matches": matches,
            "count": matches.len(),
        })))
    }

    fn definition(&self) -> ToolDefinition {
        tool_definition(
            "search_files",
            "Search for files whose name matches a regex under an allowlisted directory.",
            create_schema(
                serde_json::json!({
                    "path": {"type": "string", "description": "Directory to search"},
                    "pattern": {"type": "string", "description": "Regex to match filenames against"},
                }),
                vec!["path", "pattern"],
            ),
            SideEffectClass::Read,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips_within_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let allowed = vec![dir.path().display().to_string()];
        let write_tool = FileWriteTool::new(allowed.clone()).unwrap();
        let read_tool = FileReadTool::new(allowed).unwrap();

        let file_path = dir.path().join("greeting.txt");
        let write_result = write_tool
            .execute(ToolInput::new(serde_json::json!({
                "path": file_path.display().to_string(),
                "content": "hello",
            })))
            .await
            .unwrap();
        assert!(write_result.success);

        let read_result = read_tool
            .execute(ToolInput::new(serde_json::json!({
                "path": file_path.display().to_string(),
            })))
            .await
            .unwrap();
        assert!(read_result.success);
        assert_eq!(read_result.output["content"], "hello");
    }

    #[tokio::test]
    async fn write_outside_allowlist_is_policy_denied() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(vec![dir.path().display().to_string()]).unwrap();
        let err = tool
            .execute(ToolInput::new(serde_json::json!({
                "path": "/etc/passwd",
                "content": "pwned",
            })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "policy_denied");
    }

    #[test]
    fn construction_without_allowlist_is_configuration_error() {
        let err = FileReadTool::new(vec![]).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[tokio::test]
    async fn list_directory_skips_hidden_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();

        let tool = ListDirectoryTool::new(vec![dir.path().display().to_string()]).unwrap();
        let result = tool
            .execute(ToolInput::new(serde_json::json!({
                "path": dir.path().display().to_string(),
            })))
            .await
            .unwrap();
        assert_eq!(result.output["count"], 1);
    }

    #[tokio::test]
    async fn search_files_matches_by_regex() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.log"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let tool = SearchFilesTool::new(vec![dir.path().display().to_string()]).unwrap();
        let result = tool
            .execute(ToolInput::new(serde_json::json!({
                "path": dir.path().display().to_string(),
                "pattern": r"\.log$",
            })))
            .await
            .unwrap();
        assert_eq!(result.output["count"], 1);
    }
}
