//! Workflow Parser
//!
//! Handles loading and parsing workflow definitions from YAML files.
//! Accepts both the flat layout (`id`, `version`, `steps` at the top level)
//! and the legacy layout nested under a `workflow:` key.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use super::model::Workflow;
use super::validator::validate_workflow;

/// Key under which legacy documents nest their workflow definition.
const LEGACY_ROOT_KEY: &str = "workflow";

/// Fatal errors raised before any step executes.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read workflow file '{}': {source}. Check that the file exists and is readable.", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow YAML: {0}. Check the file format.")]
    Parse(#[from] serde_yaml::Error),
}

/// Loads a workflow from a YAML file.
///
/// This function:
/// 1. Reads the file
/// 2. Parses the YAML into typed steps
/// 3. Lints the result, logging every configuration hazard as a warning
///
/// # Example
///
/// ```rust,no_run
/// use stepflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("release.yaml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, LoadError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_workflow(&yaml_content)
}

/// Parses a workflow from YAML text.
pub fn parse_workflow(yaml_content: &str) -> Result<Workflow, LoadError> {
    let mut document: serde_yaml::Value = serde_yaml::from_str(yaml_content)?;

    if let Some(nested) = document
        .as_mapping_mut()
        .and_then(|root| root.remove(LEGACY_ROOT_KEY))
    {
        debug!("Using legacy '{}:' document layout", LEGACY_ROOT_KEY);
        document = nested;
    }

    if document.is_null() {
        document = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }

    let workflow: Workflow = serde_yaml::from_value(document)?;

    info!(
        "Parsed workflow '{}' v{} with {} top-level steps",
        workflow.id,
        workflow.version,
        workflow.steps.len()
    );

    for issue in validate_workflow(&workflow) {
        warn!("{}", issue);
    }

    Ok(workflow)
}
