//! Per-step, per-host results of a run.

use std::fs::{self, File};
use std::ops::Index;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::RolloutError;
use crate::step::FilePair;

/// Outcome of one step that actually executed on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepResult {
    Command {
        name: String,
        success: bool,
        remote: String,
    },
    File {
        remote: String,
        success: bool,
        /// Local/remote pairs with placeholders already filled in.
        files: Vec<FilePair>,
    },
    Directory {
        remote: String,
        success: bool,
    },
}

impl StepResult {
    /// The `type` tag used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            StepResult::Command { .. } => "command",
            StepResult::File { .. } => "file",
            StepResult::Directory { .. } => "directory",
        }
    }

    pub fn success(&self) -> bool {
        match self {
            StepResult::Command { success, .. }
            | StepResult::File { success, .. }
            | StepResult::Directory { success, .. } => *success,
        }
    }

    /// Address of the host the step ran on.
    pub fn remote(&self) -> &str {
        match self {
            StepResult::Command { remote, .. }
            | StepResult::File { remote, .. }
            | StepResult::Directory { remote, .. } => remote,
        }
    }

    /// Uploaded pairs, for file steps.
    pub fn files(&self) -> Option<&[FilePair]> {
        match self {
            StepResult::File { files, .. } => Some(files),
            _ => None,
        }
    }
}

/// Results for one host, in step order. Shorter than the step list when a
/// step was invalid or the host stopped early.
pub type HostRunOutcome = Vec<StepResult>;

/// Results for every host, wave by wave.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FleetOutcome(Vec<HostRunOutcome>);

impl FleetOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finished wave, keeping launch order within it.
    pub fn push_wave(&mut self, wave: Vec<HostRunOutcome>) {
        self.0.extend(wave);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostRunOutcome> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<HostRunOutcome> {
        self.0
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            hosts: self.0.len(),
            ..Default::default()
        };
        for result in self.0.iter().flatten() {
            summary.results += 1;
            if !result.success() {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Writes the outcome as YAML into `dir` and returns the file path.
    pub fn write_yaml(&self, dir: &Path, job_name: &str) -> Result<PathBuf, RolloutError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-results.yaml", sanitize(job_name)));
        let file = File::create(&path)?;
        serde_yaml::to_writer(file, self)?;
        Ok(path)
    }
}

impl Index<usize> for FleetOutcome {
    type Output = HostRunOutcome;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a FleetOutcome {
    type Item = &'a HostRunOutcome;
    type IntoIter = std::slice::Iter<'a, HostRunOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub hosts: usize,
    pub results: usize,
    pub failed: usize,
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "rollout".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(remote: &str) -> StepResult {
        StepResult::Command {
            name: "ls".to_string(),
            success: true,
            remote: remote.to_string(),
        }
    }

    #[test]
    fn test_type_tag() {
        let yaml = serde_yaml::to_string(&command("h1")).unwrap();
        assert!(yaml.contains("type: command"));
        let dir = StepResult::Directory {
            remote: "h1".to_string(),
            success: false,
        };
        assert_eq!(dir.kind(), "directory");
        assert!(serde_yaml::to_string(&dir).unwrap().contains("type: directory"));
    }

    #[test]
    fn test_waves_append_in_order() {
        let mut outcome = FleetOutcome::new();
        outcome.push_wave(vec![vec![command("a")], vec![]]);
        outcome.push_wave(vec![vec![command("c")]]);
        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome[0][0].remote(), "a");
        assert!(outcome[1].is_empty());
        assert_eq!(outcome[2][0].remote(), "c");
    }

    #[test]
    fn test_summary_counts_failures() {
        let mut outcome = FleetOutcome::new();
        outcome.push_wave(vec![
            vec![
                command("a"),
                StepResult::Directory {
                    remote: "a".to_string(),
                    success: false,
                },
            ],
            vec![],
        ]);
        assert_eq!(
            outcome.summary(),
            Summary {
                hosts: 2,
                results: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Deploy web/api"), "Deploy-web-api");
        assert_eq!(sanitize(""), "rollout");
    }

    #[test]
    fn test_write_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let mut outcome = FleetOutcome::new();
        outcome.push_wave(vec![vec![command("a")]]);
        let path = outcome.write_yaml(dir.path(), "job").unwrap();
        assert_eq!(path, dir.path().join("job-results.yaml"));
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("remote: a"));
    }
}
