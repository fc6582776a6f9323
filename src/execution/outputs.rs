//! Workflow Output Directory
//!
//! Every run writes into `<output_root>/<workflow id>/<sanitized version>`.
//! Text-producing steps persist their result there, one file per step.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use crate::workflow::Workflow;

/// How a persisted result treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Add to the end, keeping earlier invocations' output
    Append,
    /// Replace the file
    Overwrite,
}

/// The per-run output namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    /// Derives the output directory for `workflow` under `root`.
    pub fn for_workflow(root: impl AsRef<Path>, workflow: &Workflow) -> Self {
        Self {
            dir: root
                .as_ref()
                .join(&workflow.id)
                .join(workflow.sanitized_version()),
        }
    }

    /// Uses `dir` as the output directory as-is.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the output directory.
    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        debug!("Output directory ready: {}", self.dir.display());
        Ok(())
    }

    /// Path of a file inside the output directory.
    ///
    /// Absolute paths and `..` components are flattened so a step can never
    /// write outside the directory.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let relative: PathBuf = Path::new(name)
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();

        if relative.as_os_str() != name {
            warn!(
                "Output path '{}' was confined to '{}'",
                name,
                relative.display()
            );
        }
        self.dir.join(relative)
    }

    /// Log file for a backgrounded command.
    pub fn background_log(&self, key: &str) -> PathBuf {
        self.path_for(&format!("{}.background.log", key))
    }

    /// Writes `text` to `name` inside the output directory.
    pub fn persist(&self, name: &str, text: &str, mode: WriteMode) -> io::Result<PathBuf> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match mode {
            WriteMode::Overwrite => fs::write(&path, text)?,
            WriteMode::Append => {
                let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
                writeln!(file, "{}", text)?;
            }
        }

        debug!("Persisted {} bytes to {}", text.len(), path.display());
        Ok(path)
    }
}
