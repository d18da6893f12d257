//! Tool trait, declarations, and the in-memory registry.
//!
//! Grounded in the teacher's `tools::registry::{Tool, ToolRegistry, ToolContext, ToolResult}`.
//! The teacher's hook-driven, multi-tenant `ToolContext` (MCP manager, skills manager, process
//! registry, subagent progress channels) is trimmed to the fields SPEC_FULL.md §4.4 actually
//! needs: a sandboxed working directory and the calling agent's identity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

/// Static declaration of a tool: name, schema, local-vs-remote, and the agents permitted to
/// call it (SPEC_FULL.md §4.4).
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub local: bool,
    pub allowed_agents: Vec<String>,
}

/// Structured tool output, matching the reference runtime's `{ok, data|error}` envelope so
/// downstream agent code can branch on `ok` instead of sniffing strings.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub value: Value,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            value: json!({"ok": true, "data": data}),
        }
    }

    pub fn error(code: &str, message: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            value: json!({"ok": false, "error": {"code": code, "message": message.to_string()}}),
        }
    }
}

/// Per-call execution context. `sandbox_root` is the session's working_dir; every path-taking
/// tool must resolve through [`ToolContext::sandboxed_resolve`] rather than touching the
/// filesystem directly.
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub agent: String,
    pub session_id: String,
}

impl ToolContext {
    pub fn new(working_dir: PathBuf, agent: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            working_dir,
            agent: agent.into(),
            session_id: session_id.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    /// Rejects `..` components outright, then resolves and requires the result (after symlink
    /// resolution, where the path already exists) to remain within `working_dir`.
    pub fn sandboxed_resolve(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve(path);
        for component in resolved.components() {
            if matches!(component, std::path::Component::ParentDir) {
                return Err("path traversal (..) is not allowed".to_string());
            }
        }
        if resolved.exists() {
            let canonical = resolved
                .canonicalize()
                .map_err(|e| format!("cannot resolve path: {e}"))?;
            let sandbox = self
                .working_dir
                .canonicalize()
                .unwrap_or_else(|_| self.working_dir.clone());
            if !canonical.starts_with(&sandbox) {
                return Err(format!("access denied: '{path}' is outside the session working directory"));
            }
            return Ok(canonical);
        }
        Ok(resolved)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name.clone();
        self.tools.write().await.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn specs(&self) -> Vec<ToolSpec> {
        self.tools.read().await.values().map(|t| t.spec()).collect()
    }
}
