//! The multi-agent orchestrator (SPEC_FULL.md §4.6).
//!
//! Composes every leaf component below it: [`crate::storage`] for session/message/plan state,
//! [`crate::approval`] and [`crate::tools`] for the tool-call sub-loop, and [`crate::ai`] for the
//! streaming completion itself.

pub mod classify;
pub mod definitions;
pub mod loop_events;
pub mod orchestrator;
pub mod plan;

pub use classify::{classify_turn, ClassificationResult};
pub use definitions::AgentDefinition;
pub use loop_events::{LoopEvent, LoopInput};
pub use orchestrator::{AgentServices, AgenticOrchestrator, TurnHandle};
pub use plan::PlanExecutionEngine;
