//! The closed agent set (SPEC_FULL.md §4.6.1).
//!
//! Grounded in the teacher's `PermissionMode`/`ToolCategory` split (`tools::registry`), generalized
//! from one global supervised/autonomous mode into a per-agent allow-list — enforced by
//! [`crate::tools::ToolSpec::allowed_agents`], not duplicated here. An `AgentDefinition` only
//! carries what the allow-list can't express: the system prompt and an optional file-path
//! restriction (architect's markdown-only rule).

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::tools::FileRestriction;

pub const ORCHESTRATOR: &str = "orchestrator";
pub const CODER: &str = "coder";
pub const ARCHITECT: &str = "architect";
pub const DEBUG: &str = "debug";
pub const ASK: &str = "ask";

pub struct AgentDefinition {
    pub name: &'static str,
    pub system_prompt: &'static str,
    /// `None` means no additional restriction beyond the tool's own allow-list.
    pub file_restriction: Option<FileRestriction>,
}

static DEFINITIONS: Lazy<Vec<AgentDefinition>> = Lazy::new(|| {
    vec![
        AgentDefinition {
            name: ORCHESTRATOR,
            system_prompt: "You are the routing agent. Classify each incoming request and hand \
                it to the right specialist; do not attempt the work yourself. Ask the user a \
                clarifying question only when the request is genuinely ambiguous.",
            file_restriction: None,
        },
        AgentDefinition {
            name: CODER,
            system_prompt: "You are the coding agent. You may read, write, and edit any file in \
                the working directory and run shell commands to build and test your changes.",
            file_restriction: None,
        },
        AgentDefinition {
            name: ARCHITECT,
            system_prompt: "You are the architecture agent. You design and document, but you do \
                not write implementation code. You may only create or edit Markdown and plain-text \
                documentation files.",
            file_restriction: Some(markdown_only()),
        },
        AgentDefinition {
            name: DEBUG,
            system_prompt: "You are the debugging agent. You read code, reproduce failures with \
                shell commands, and apply targeted edits to fix them. Prefer the smallest change \
                that resolves the root cause.",
            file_restriction: None,
        },
        AgentDefinition {
            name: ASK,
            system_prompt: "You are the read-only answer agent. You may read files to ground your \
                answer but you never write, edit, or execute anything.",
            file_restriction: None,
        },
    ]
});

fn markdown_only() -> FileRestriction {
    Arc::new(|path: &Path| {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("markdown") | Some("txt")
        )
    })
}

pub fn get(name: &str) -> Option<&'static AgentDefinition> {
    DEFINITIONS.iter().find(|d| d.name == name)
}

pub fn all_names() -> Vec<&'static str> {
    DEFINITIONS.iter().map(|d| d.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architect_restriction_rejects_source_files() {
        let def = get(ARCHITECT).unwrap();
        let restriction = def.file_restriction.as_ref().unwrap();
        assert!(restriction(Path::new("notes.md")));
        assert!(!restriction(Path::new("src/main.rs")));
    }

    #[test]
    fn coder_has_no_restriction() {
        assert!(get(CODER).unwrap().file_restriction.is_none());
    }

    #[test]
    fn all_five_agents_are_defined() {
        let mut names = all_names();
        names.sort_unstable();
        assert_eq!(names, vec![ARCHITECT, ASK, CODER, DEBUG, ORCHESTRATOR]);
    }
}
