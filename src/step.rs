//! Deployment steps.
//!
//! Steps come out of the config file as loosely shaped mappings. They are
//! converted exactly once, during config validation, into the [`Step`] tagged
//! union so that dispatch never has to probe optional fields.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use void::Void;

use crate::error::RolloutError;
use crate::serde::string_or_mapping;

/// Placeholder replaced with the host's global index.
pub const INDEX_TOKEN: &str = "{index}";

/// Replaces the first occurrence of `{index}` in `text` with `index`.
///
/// Later occurrences are left untouched.
pub fn substitute(text: &str, index: usize) -> String {
    text.replacen(INDEX_TOKEN, &index.to_string(), 1)
}

/// A local path and where it should land on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePair {
    pub local: String,
    pub remote: String,
}

impl FilePair {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// Both paths with the host index filled in.
    pub fn substitute(&self, index: usize) -> Self {
        Self {
            local: substitute(&self.local, index),
            remote: substitute(&self.remote, index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub command: String,
    pub cwd: Option<String>,
    /// `KEY=VALUE` entries exported before the command runs.
    pub env: Vec<String>,
    /// Escalate anything written to stderr into a failure for the host.
    pub catch_err: bool,
    /// Run through `sudo`, feeding the login password on stdin.
    pub with_root: bool,
    pub name: Option<String>,
}

impl CommandStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: Vec::new(),
            catch_err: false,
            with_root: false,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStep {
    pub files: Vec<FilePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStep {
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command(CommandStep),
    Files(FileStep),
    Directory(DirectoryStep),
    /// None of `run`, `files` or `directory` was given.
    Invalid,
}

impl Step {
    pub fn command(command: impl Into<String>) -> Self {
        Step::Command(CommandStep::new(command))
    }

    pub fn files(files: Vec<FilePair>) -> Self {
        Step::Files(FileStep { files })
    }

    pub fn directory(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Step::Directory(DirectoryStep {
            local: local.into(),
            remote: remote.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Command(_) => "command",
            Step::Files(_) => "files",
            Step::Directory(_) => "directory",
            Step::Invalid => "invalid",
        }
    }

    /// Resolves a raw step by priority `run` > `files` > `directory`.
    pub(crate) fn from_raw(position: usize, raw: RawStep) -> Result<Self, RolloutError> {
        let RawStep(fields) = raw;
        if let Some(command) = fields.run {
            return Ok(Step::Command(CommandStep {
                command,
                cwd: fields.cwd,
                env: fields.env.unwrap_or_default(),
                catch_err: fields.catch_err.unwrap_or(false),
                with_root: fields.with_root.unwrap_or(false),
                name: fields.name,
            }));
        }
        if let Some(files) = fields.files {
            if files.is_empty() {
                return Err(RolloutError::Config(format!(
                    "Step {} has an empty 'files' list",
                    position
                )));
            }
            return Ok(Step::Files(FileStep { files }));
        }
        if let Some(FilePair { local, remote }) = fields.directory {
            return Ok(Step::Directory(DirectoryStep { local, remote }));
        }
        Ok(Step::Invalid)
    }
}

/// A step exactly as written in the config file.
#[derive(Debug, Deserialize)]
pub(crate) struct RawStep(#[serde(deserialize_with = "string_or_mapping")] RawStepFields);

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawStepFields {
    run: Option<String>,
    cwd: Option<String>,
    env: Option<Vec<String>>,
    catch_err: Option<bool>,
    with_root: Option<bool>,
    name: Option<String>,
    files: Option<Vec<FilePair>>,
    directory: Option<FilePair>,
}

impl FromStr for RawStepFields {
    type Err = Void;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            run: Some(s.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Vec<Step> {
        let raw: Vec<RawStep> = serde_yaml::from_str(yaml).unwrap();
        raw.into_iter()
            .enumerate()
            .map(|(i, raw)| Step::from_raw(i, raw).unwrap())
            .collect()
    }

    #[test]
    fn test_substitute_replaces_token() {
        assert_eq!(substitute("/a-{index}.md", 0), "/a-0.md");
        assert_eq!(substitute("/a-{index}.md", 1), "/a-1.md");
        assert_eq!(substitute("node{index}", 12), "node12");
    }

    #[test]
    fn test_substitute_without_token_is_unchanged() {
        assert_eq!(substitute("/etc/hosts", 3), "/etc/hosts");
        assert_eq!(substitute("{indx}", 3), "{indx}");
    }

    #[test]
    fn test_substitute_only_first_occurrence() {
        assert_eq!(substitute("{index}/{index}", 7), "7/{index}");
    }

    #[test]
    fn test_file_pair_substitutes_both_sides() {
        let pair = FilePair::new("/src/{index}.conf", "/etc/app-{index}.conf");
        assert_eq!(
            pair.substitute(4),
            FilePair::new("/src/4.conf", "/etc/app-4.conf")
        );
    }

    #[test]
    fn test_bare_string_is_run() {
        let steps = parse("- ls -al\n");
        assert_eq!(steps, vec![Step::command("ls -al")]);
    }

    #[test]
    fn test_command_fields() {
        let steps = parse(
            r#"
- run: make install
  cwd: /srv/app
  env: ["MODE=prod"]
  catch_err: true
  with_root: true
  name: Install
"#,
        );
        let Step::Command(step) = &steps[0] else {
            panic!("expected a command step, got {:?}", steps[0]);
        };
        assert_eq!(step.command, "make install");
        assert_eq!(step.cwd.as_deref(), Some("/srv/app"));
        assert_eq!(step.env, vec!["MODE=prod".to_string()]);
        assert!(step.catch_err);
        assert!(step.with_root);
        assert_eq!(step.name.as_deref(), Some("Install"));
    }

    #[test]
    fn test_command_defaults() {
        let Step::Command(step) = &parse("- run: ls\n")[0] else {
            panic!("expected a command step");
        };
        assert!(!step.catch_err);
        assert!(!step.with_root);
        assert!(step.env.is_empty());
        assert!(step.name.is_none());
    }

    #[test]
    fn test_priority_run_over_files_over_directory() {
        let steps = parse(
            r#"
- run: ls
  files: [{local: /a, remote: /b}]
  directory: {local: /c, remote: /d}
- files: [{local: /a, remote: /b}]
  directory: {local: /c, remote: /d}
- directory: {local: /c, remote: /d}
"#,
        );
        assert_eq!(steps[0].kind(), "command");
        assert_eq!(steps[1], Step::files(vec![FilePair::new("/a", "/b")]));
        assert_eq!(steps[2], Step::directory("/c", "/d"));
    }

    #[test]
    fn test_step_without_action_is_invalid() {
        let steps = parse("- name: nothing to do\n  cwd: /tmp\n");
        assert_eq!(steps, vec![Step::Invalid]);
    }

    #[test]
    fn test_empty_files_is_rejected() {
        let raw: Vec<RawStep> = serde_yaml::from_str("- files: []\n").unwrap();
        let err = Step::from_raw(0, raw.into_iter().next().unwrap()).unwrap_err();
        assert!(matches!(err, RolloutError::Config(_)));
    }
}
