//! Workflow Data Model
//!
//! Core data structures representing a workflow and its typed steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: nightly_report
//! version: "1.2"
//! steps:
//!   - id: fetch
//!     type: system_command
//!     command: curl -s https://example.com/status
//!
//!   - type: set_variable
//!     variable: retries
//!     value: 0
//!
//!   - type: condition
//!     condition: "fetch.output == 'ok'"
//!     then:
//!       - type: notification
//!         message: "Status is {{ fetch.output }}"
//!     else:
//!       - type: goto
//!         target: fetch
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Workflow id used when the document does not declare one.
const DEFAULT_WORKFLOW_ID: &str = "workflow";

/// Version used when the document does not declare one.
const DEFAULT_WORKFLOW_VERSION: &str = "1.0";

/// Represents a single step in a workflow.
///
/// The `type` field selects the [`StepKind`]; every kind accepts an optional
/// `id` (the key its output is published under) and a display `name`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Output key and `goto` target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human readable name used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// What the step does
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The kind-specific part of a step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    SystemCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        #[serde(default)]
        background: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },
    BrowserAction {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Seconds to wait for a selector
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    #[serde(alias = "gemini_analyze")]
    AiAnalyze {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },
    Condition {
        condition: String,
        #[serde(default)]
        then: Vec<Step>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Step>,
    },
    Notification {
        message: String,
    },
    ForLoop {
        variable: String,
        start: Value,
        end: Value,
        #[serde(default = "default_step_amount")]
        increment: Value,
        #[serde(default)]
        steps: Vec<Step>,
    },
    WhileLoop {
        condition: String,
        #[serde(default)]
        steps: Vec<Step>,
    },
    DoWhileLoop {
        condition: String,
        #[serde(default)]
        steps: Vec<Step>,
    },
    SetVariable {
        variable: String,
        #[serde(default)]
        value: Value,
    },
    IncrementVariable {
        variable: String,
        #[serde(default = "default_step_amount")]
        amount: Value,
    },
    Goto {
        target: String,
    },
    Label,
    ParallelForEach {
        list: Value,
        #[serde(default = "default_item_variable")]
        item_variable: String,
        #[serde(default)]
        steps: Vec<Step>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_workers: Option<usize>,
    },
    ParallelAndBranch {
        #[serde(default)]
        branches: Vec<Vec<Step>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_workers: Option<usize>,
    },
    ParallelOrBranch {
        #[serde(default)]
        branches: Vec<Vec<Step>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_workers: Option<usize>,
    },
    SplitList {
        list: Value,
        #[serde(
            deserialize_with = "ordered_groups",
            serialize_with = "serialize_groups"
        )]
        groups: Vec<GroupShare>,
    },
    /// Any `type` this interpreter does not know about
    #[serde(other)]
    Unsupported,
}

/// One named partition of a `split_list` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupShare {
    pub name: String,
    /// Whole-number percentage of the input list
    pub percent: u32,
}

impl GroupShare {
    pub fn new(name: impl Into<String>, percent: u32) -> Self {
        Self {
            name: name.into(),
            percent,
        }
    }
}

fn default_step_amount() -> Value {
    Value::from(1)
}

fn default_item_variable() -> String {
    "item".to_string()
}

/// Deserializes `split_list` groups from a mapping, keeping declaration order.
///
/// Also accepts a sequence of single-entry mappings.
fn ordered_groups<'de, D>(deserializer: D) -> Result<Vec<GroupShare>, D::Error>
where
    D: Deserializer<'de>,
{
    struct GroupsVisitor;

    impl<'de> Visitor<'de> for GroupsVisitor {
        type Value = Vec<GroupShare>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of group name to percentage")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut groups = Vec::new();
            while let Some((name, percent)) = map.next_entry::<String, u32>()? {
                groups.push(GroupShare { name, percent });
            }
            Ok(groups)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut groups = Vec::new();
            while let Some(entry) = seq.next_element::<HashMap<String, u32>>()? {
                if entry.len() != 1 {
                    return Err(de::Error::custom(
                        "Expected exactly one group per list entry",
                    ));
                }
                groups.extend(
                    entry
                        .into_iter()
                        .map(|(name, percent)| GroupShare { name, percent }),
                );
            }
            Ok(groups)
        }
    }

    deserializer.deserialize_any(GroupsVisitor)
}

fn serialize_groups<S>(groups: &[GroupShare], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(groups.len()))?;
    for group in groups {
        map.serialize_entry(&group.name, &group.percent)?;
    }
    map.end()
}

/// Accepts versions written as text (`"1.2"`) or as a bare YAML number (`1.2`).
fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(DEFAULT_WORKFLOW_VERSION.to_string()),
        _ => Err(de::Error::custom("Expected version as text or number")),
    }
}

impl Step {
    /// Creates an anonymous step of the given kind.
    ///
    /// # Example
    ///
    /// ```
    /// use stepflow::workflow::{Step, StepKind};
    ///
    /// let step = Step::new(StepKind::Notification { message: "done".into() })
    ///     .with_id("notify")
    ///     .with_name("Tell the team");
    /// assert_eq!(step.kind_name(), "notification");
    /// ```
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: None,
            name: None,
            kind,
        }
    }

    /// Sets the output key / jump target of this step.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into().trim().to_string());
        self
    }

    /// Sets the display name of this step.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Shorthand for a `system_command` step.
    pub fn command(command: impl Into<String>) -> Self {
        Self::new(StepKind::SystemCommand {
            command: command.into(),
            working_dir: None,
            background: false,
            output_path: None,
        })
    }

    /// Shorthand for a `set_variable` step.
    pub fn set(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(StepKind::SetVariable {
            variable: variable.into(),
            value: value.into(),
        })
    }

    /// Shorthand for an `increment_variable` step.
    pub fn increment(variable: impl Into<String>, amount: i64) -> Self {
        Self::new(StepKind::IncrementVariable {
            variable: variable.into(),
            amount: Value::from(amount),
        })
    }

    /// Shorthand for a `notification` step.
    pub fn notify(message: impl Into<String>) -> Self {
        Self::new(StepKind::Notification {
            message: message.into(),
        })
    }

    /// Shorthand for a `goto` step.
    pub fn goto(target: impl Into<String>) -> Self {
        Self::new(StepKind::Goto {
            target: target.into(),
        })
    }

    /// Shorthand for a `label` step.
    pub fn label(id: impl Into<String>) -> Self {
        Self::new(StepKind::Label).with_id(id)
    }

    /// Key under which this step publishes its textual result.
    pub fn output_key(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("{}.output", id))
    }

    /// The `type` name of this step's kind.
    pub fn kind_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Name used when logging this step: its name, then its id, then its kind.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or_else(|| self.kind_name())
    }

    /// Returns true if this step is a `goto`.
    pub fn is_jump(&self) -> bool {
        matches!(self.kind, StepKind::Goto { .. })
    }

    /// Nested step lists owned by this step (bodies and branches).
    pub fn nested_bodies(&self) -> Vec<&[Step]> {
        match &self.kind {
            StepKind::Condition {
                then, otherwise, ..
            } => vec![then.as_slice(), otherwise.as_slice()],
            StepKind::ForLoop { steps, .. }
            | StepKind::WhileLoop { steps, .. }
            | StepKind::DoWhileLoop { steps, .. }
            | StepKind::ParallelForEach { steps, .. } => vec![steps.as_slice()],
            StepKind::ParallelAndBranch { branches, .. }
            | StepKind::ParallelOrBranch { branches, .. } => {
                branches.iter().map(|b| b.as_slice()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl StepKind {
    /// The `type` tag this kind is written as.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SystemCommand { .. } => "system_command",
            Self::BrowserAction { .. } => "browser_action",
            Self::AiAnalyze { .. } => "ai_analyze",
            Self::Condition { .. } => "condition",
            Self::Notification { .. } => "notification",
            Self::ForLoop { .. } => "for_loop",
            Self::WhileLoop { .. } => "while_loop",
            Self::DoWhileLoop { .. } => "do_while_loop",
            Self::SetVariable { .. } => "set_variable",
            Self::IncrementVariable { .. } => "increment_variable",
            Self::Goto { .. } => "goto",
            Self::Label => "label",
            Self::ParallelForEach { .. } => "parallel_for_each",
            Self::ParallelAndBranch { .. } => "parallel_and_branch",
            Self::ParallelOrBranch { .. } => "parallel_or_branch",
            Self::SplitList { .. } => "split_list",
            Self::Unsupported => "unsupported",
        }
    }
}

/// A complete workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    /// Workflow identifier, first segment of the output directory
    #[serde(default = "default_workflow_id")]
    pub id: String,

    /// Dot-delimited version, sanitized into the second directory segment
    #[serde(default = "default_workflow_version", deserialize_with = "text_or_number")]
    pub version: String,

    /// Top-level steps in program-counter order
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_workflow_id() -> String {
    DEFAULT_WORKFLOW_ID.to_string()
}

fn default_workflow_version() -> String {
    DEFAULT_WORKFLOW_VERSION.to_string()
}

impl Workflow {
    /// Creates an empty workflow with default id and version.
    pub fn new() -> Self {
        Self {
            id: default_workflow_id(),
            version: default_workflow_version(),
            steps: Vec::new(),
        }
    }

    /// Creates a workflow from a list of top-level steps.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::new()
        }
    }

    /// Sets the workflow id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the workflow version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Version with dots replaced by underscores, usable as a path segment.
    pub fn sanitized_version(&self) -> String {
        self.version.replace('.', "_")
    }

    /// Gets a top-level step by id.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id.as_deref() == Some(id))
    }

    /// Returns the number of top-level steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}
