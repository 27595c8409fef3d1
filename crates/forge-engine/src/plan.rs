//! The layered execution plan derived from a task graph.

use std::fmt::Write as _;

use forge_core::identifier::TaskId;
use itertools::Itertools;

/// A task graph partitioned into ordered layers: layer `i` only depends on
/// layers `< i`. Used for reporting (`--dry-run`) and as a fallback
/// execution schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    layers: Vec<Vec<TaskId>>,
}

impl ExecutionPlan {
    pub(crate) fn new(layers: Vec<Vec<TaskId>>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[Vec<TaskId>] {
        &self.layers
    }

    /// Every task id in the plan, layer by layer.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.layers.iter().flatten()
    }

    /// Total number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Render the plan as text, one line per layer.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (index, layer) in self.layers.iter().enumerate() {
            let _ = writeln!(out, "layer {}: [{}]", index, layer.iter().join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(repr: &str) -> TaskId {
        repr.parse().unwrap()
    }

    #[test]
    fn renders_layer_lines() {
        let plan = ExecutionPlan::new(vec![
            vec![id("b:build")],
            vec![id("a:build"), id("c:build")],
        ]);
        let text = plan.render_text();
        assert_eq!(text, "layer 0: [b:build]\nlayer 1: [a:build, c:build]\n");
        assert_eq!(plan.len(), 3);
    }
}
