//! Per-step execution events.
//!
//! The execution engine reports which flow element it just ran; the server
//! records these best-effort for the process timeline view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type for flow element events.
pub const ELEMENT_EVENT_TYPE: &str = "ELEMENT";

/// Kind of a flow step, as seen by the event-recording boundary.
///
/// A tagged kind instead of a type hierarchy: the recorder filters on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    FlowCall,
    TaskCall,
    Expression,
    Other,
}

/// A single executed flow step with its source location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,

    /// Flow name for FlowCall steps, element name otherwise.
    pub name: String,

    pub line: u32,
    pub column: u32,
}

impl Step {
    pub fn new(kind: StepKind, name: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            name: name.into(),
            line,
            column,
        }
    }

    /// Human-readable description used in the recorded event.
    pub fn description(&self) -> String {
        match self.kind {
            StepKind::FlowCall => format!("Flow call: {}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// A recorded process event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub event_type: String,
    pub data: serde_json::Value,
    pub event_date: DateTime<Utc>,
}

impl ProcessEvent {
    /// Build an ELEMENT event for an executed step.
    pub fn element(step: &Step, event_date: DateTime<Utc>) -> Self {
        Self {
            event_type: ELEMENT_EVENT_TYPE.to_string(),
            data: serde_json::json!({
                "line": step.line,
                "column": step.column,
                "description": step.description(),
            }),
            event_date,
        }
    }
}
