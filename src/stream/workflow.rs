use std::collections::BTreeMap;

use crate::models::{WorkflowPhase, WorkflowStep};
use crate::stream::events::WorkflowStatus;

/// Coarse execution ticker keyed by step index. Phases only move forward.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTracker {
    steps: BTreeMap<u32, WorkflowStep>,
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a backend signal. Returns whether anything visible changed.
    pub fn apply(&mut self, step_index: u32, name: Option<String>, status: WorkflowStatus) -> bool {
        let phase = match status {
            WorkflowStatus::Started => WorkflowPhase::Started,
            WorkflowStatus::Completed => WorkflowPhase::Completed,
        };
        let step = self.steps.entry(step_index).or_insert_with(|| WorkflowStep {
            step_index,
            name: format!("Step {}", step_index),
            phase: WorkflowPhase::Pending,
        });

        let mut changed = false;
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            if step.name != name {
                step.name = name;
                changed = true;
            }
        }
        if phase > step.phase {
            step.phase = phase;
            changed = true;
        }
        changed
    }

    /// Steps in ascending index order.
    pub fn steps(&self) -> Vec<WorkflowStep> {
        self.steps.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
