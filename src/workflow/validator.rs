//! Workflow Validation
//!
//! Lints a parsed workflow for configuration hazards:
//! - Duplicate top-level ids (only the first is a `goto` target)
//! - `goto` steps whose target does not exist or that sit in parallel branches
//! - Loops that cannot terminate because their increment is zero
//! - `split_list` steps with no id or with percentages not summing to 100
//! - Unsupported step types
//!
//! None of these stop a run. The parser logs them as warnings.

use std::collections::HashSet;

use log::debug;
use serde_json::Value;

use super::model::{Step, StepKind, Workflow};

/// A configuration hazard found in a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    DuplicateId(String),
    UnknownGotoTarget { step: String, target: String },
    BranchGoto { target: String },
    ZeroIncrement(String),
    SplitWithoutId,
    GroupShareTotal { step: String, total: u64 },
    EmptyBranches(String),
    UnsupportedStep(String),
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => {
                write!(f, "Duplicate top-level step id '{}': goto jumps to the first one", id)
            }
            Self::UnknownGotoTarget { step, target } => {
                write!(f, "Step '{}' jumps to unknown step '{}'", step, target)
            }
            Self::BranchGoto { target } => write!(
                f,
                "goto '{}' is inside a parallel branch and will be ignored",
                target
            ),
            Self::ZeroIncrement(step) => {
                write!(f, "Loop '{}' has a zero increment and may never finish", step)
            }
            Self::SplitWithoutId => {
                write!(f, "split_list step has no id, its groups will not be stored")
            }
            Self::GroupShareTotal { step, total } => write!(
                f,
                "Step '{}': group percentages add up to {} instead of 100",
                step, total
            ),
            Self::EmptyBranches(step) => write!(f, "Step '{}' declares no branches", step),
            Self::UnsupportedStep(step) => write!(f, "Step '{}' has an unsupported type", step),
        }
    }
}

/// Validates the whole workflow and returns every hazard found.
pub fn validate_workflow(workflow: &Workflow) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if let Some(id) = step.id.as_deref() {
            if !seen_ids.insert(id) {
                issues.push(ValidationIssue::DuplicateId(id.to_string()));
            }
        }
    }

    for step in &workflow.steps {
        validate_step(step, &seen_ids, false, &mut issues);
    }

    debug!(
        "Validated workflow '{}': {} issue(s)",
        workflow.id,
        issues.len()
    );
    issues
}

/// Validates a single step and, recursively, its nested bodies.
///
/// `ids` holds the top-level step ids, the only valid `goto` targets.
fn validate_step(
    step: &Step,
    ids: &HashSet<&str>,
    in_branch: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    let name = step.display_name().to_string();

    match &step.kind {
        StepKind::Goto { target } if in_branch => {
            issues.push(ValidationIssue::BranchGoto {
                target: target.clone(),
            });
        }
        StepKind::Goto { target } if !ids.contains(target.as_str()) => {
            issues.push(ValidationIssue::UnknownGotoTarget {
                step: name,
                target: target.clone(),
            });
        }
        StepKind::ForLoop { increment, .. } if is_zero(increment) => {
            issues.push(ValidationIssue::ZeroIncrement(name));
        }
        StepKind::SplitList { groups, .. } => {
            if step.id.is_none() {
                issues.push(ValidationIssue::SplitWithoutId);
            }
            let total: u64 = groups.iter().map(|g| u64::from(g.percent)).sum();
            if total != 100 {
                issues.push(ValidationIssue::GroupShareTotal { step: name, total });
            }
        }
        StepKind::ParallelAndBranch { branches, .. }
        | StepKind::ParallelOrBranch { branches, .. }
            if branches.is_empty() =>
        {
            issues.push(ValidationIssue::EmptyBranches(name));
        }
        StepKind::Unsupported => issues.push(ValidationIssue::UnsupportedStep(name)),
        _ => {}
    }

    let in_branch = in_branch
        || matches!(
            step.kind,
            StepKind::ParallelForEach { .. }
                | StepKind::ParallelAndBranch { .. }
                | StepKind::ParallelOrBranch { .. }
        );
    for body in step.nested_bodies() {
        for inner in body {
            validate_step(inner, ids, in_branch, issues);
        }
    }
}

fn is_zero(value: &Value) -> bool {
    value.as_i64() == Some(0)
}
