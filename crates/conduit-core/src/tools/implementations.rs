//! Built-in local tools (SPEC_FULL.md §4.4.1), grounded in the teacher's
//! `tools::implementations::{read, write, bash}`.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::registry::{Tool, ToolContext, ToolResult, ToolSpec};

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params).map_err(|e| ToolResult::error("invalid_parameters", e))
}

pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadParams {
    path: String,
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read the contents of a file within the session's working directory".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
            local: true,
            allowed_agents: vec![
                "orchestrator".to_string(),
                "coder".to_string(),
                "architect".to_string(),
                "debug".to_string(),
                "ask".to_string(),
            ],
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<ReadParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = match ctx.sandboxed_resolve(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error("access_denied", e),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolResult::success(json!({"content": content})),
            Err(e) => ToolResult::error("tool_error", format!("failed to read {}: {e}", path.display())),
        }
    }
}

pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Create or overwrite a file within the session's working directory".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"],
            }),
            local: true,
            allowed_agents: vec!["coder".to_string(), "debug".to_string()],
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<WriteParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = match ctx.sandboxed_resolve(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error("access_denied", e),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error("tool_error", format!("failed to create {}: {e}", parent.display()));
            }
        }
        match tokio::fs::write(&path, &params.content).await {
            Ok(()) => ToolResult::success(json!({"bytes_written": params.content.len()})),
            Err(e) => ToolResult::error("tool_error", format!("failed to write {}: {e}", path.display())),
        }
    }
}

pub struct EditFileTool;

#[derive(Deserialize)]
struct EditParams {
    path: String,
    old_text: String,
    new_text: String,
}

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file".to_string(),
            description: "Replace an exact text span in a file within the session's working directory".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old_text": {"type": "string"},
                    "new_text": {"type": "string"},
                },
                "required": ["path", "old_text", "new_text"],
            }),
            local: true,
            allowed_agents: vec!["coder".to_string(), "debug".to_string()],
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<EditParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = match ctx.sandboxed_resolve(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error("access_denied", e),
        };
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error("tool_error", format!("failed to read {}: {e}", path.display())),
        };
        let occurrences = content.matches(&params.old_text).count();
        if occurrences == 0 {
            return ToolResult::error("tool_error", "old_text not found in file");
        }
        if occurrences > 1 {
            return ToolResult::error("tool_error", format!("old_text is ambiguous ({occurrences} occurrences)"));
        }
        let updated = content.replacen(&params.old_text, &params.new_text, 1);
        match tokio::fs::write(&path, &updated).await {
            Ok(()) => ToolResult::success(json!({"replaced": 1})),
            Err(e) => ToolResult::error("tool_error", format!("failed to write {}: {e}", path.display())),
        }
    }
}

/// Output is capped rather than streamed in true chunks — an in-process channel-based heartbeat
/// forwarder (mirroring the reference runtime's `ToolOutputChunk`) belongs to the orchestrator's
/// turn loop, which owns the transport edge; this tool returns the full buffered result the
/// orchestrator then forwards incrementally isn't needed for a bounded command.
const MAX_BASH_OUTPUT: usize = 30_000;

pub struct BashTool;

#[derive(Deserialize)]
struct BashParams {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "bash".to_string(),
            description: "Run a shell command in the session's working directory".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout_secs": {"type": "number"},
                },
                "required": ["command"],
            }),
            local: true,
            allowed_agents: vec!["coder".to_string()],
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<BashParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let timeout = std::time::Duration::from_secs(params.timeout_secs.unwrap_or(120));

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error("tool_error", format!("failed to spawn shell: {e}")),
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error("tool_error", format!("shell command failed: {e}")),
            Err(_) => {
                return ToolResult::error("timeout", format!("command timed out after {}s", timeout.as_secs()));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let truncated = truncate_output(&combined, MAX_BASH_OUTPUT);

        ToolResult::success(json!({
            "output": truncated,
            "exit_code": output.status.code(),
        }))
    }
}

/// Not a filesystem tool: asks the user a clarifying question and suspends the turn for a reply.
/// Declared `local: false` so the dispatcher routes it through the same awaiting-remote path as
/// an IDE tool — the orchestrator treats "waiting on the human" and "waiting on the IDE" the same
/// way, matching SPEC_FULL.md §4.6.1's framing of the orchestrator agent as having "no tools
/// beyond AskUserQuestion". `execute` is never called: non-local tools short-circuit in the
/// dispatcher before any `Tool::execute` call.
pub struct AskUserQuestionTool;

#[async_trait::async_trait]
impl Tool for AskUserQuestionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "AskUserQuestion".to_string(),
            description: "Ask the user a clarifying question and await their reply".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {"question": {"type": "string"}},
                "required": ["question"],
            }),
            local: false,
            allowed_agents: vec![
                "orchestrator".to_string(),
                "coder".to_string(),
                "architect".to_string(),
                "debug".to_string(),
                "ask".to_string(),
            ],
        }
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error("unreachable", "AskUserQuestion is never executed locally")
    }
}

fn truncate_output(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut end = max_chars;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n...[truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "coder", "s1");

        let write_result = WriteFileTool
            .execute(json!({"path": "a.txt", "content": "hello"}), &ctx)
            .await;
        assert!(write_result.ok);

        let read_result = ReadFileTool.execute(json!({"path": "a.txt"}), &ctx).await;
        assert!(read_result.ok);
        assert_eq!(read_result.value["data"]["content"], "hello");
    }

    #[tokio::test]
    async fn read_file_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "coder", "s1");
        let result = ReadFileTool.execute(json!({"path": "../../etc/passwd"}), &ctx).await;
        assert!(!result.ok);
        assert_eq!(result.value["error"]["code"], "access_denied");
    }

    #[tokio::test]
    async fn edit_file_rejects_ambiguous_match() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "coder", "s1");
        WriteFileTool
            .execute(json!({"path": "a.txt", "content": "foo foo"}), &ctx)
            .await;

        let result = EditFileTool
            .execute(json!({"path": "a.txt", "old_text": "foo", "new_text": "bar"}), &ctx)
            .await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn bash_runs_command_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "coder", "s1");
        let result = BashTool.execute(json!({"command": "echo hi"}), &ctx).await;
        assert!(result.ok);
        assert_eq!(result.value["data"]["output"], "hi\n");
    }
}
