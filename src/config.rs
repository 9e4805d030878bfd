//! Configuration for Rollout.
//!
//! Holds the clap struct for command line arguments and the deployment
//! config file loader. The config file is validated in a single pass before
//! any host is contacted and is read-only afterwards.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::RolloutError;
use crate::step::{RawStep, Step};

/// Used when the config has no `concurrency` key.
pub const DEFAULT_CONCURRENCY: usize = 2;
/// Used when the config has no `logger.output` key.
pub const DEFAULT_LOGGER_OUTPUT: &str = "./";

#[derive(Parser)]
#[command(version, author, about)]
pub struct Cli {
    /// Deployment config file, e.g. deploy.yaml
    pub config: PathBuf,
}

/// Login used for every host. The password never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A validated deployment config.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub remote: Vec<String>,
    pub login: Credentials,
    pub logger_output_dir: PathBuf,
    /// Hosts per wave, also the per-host file transfer parallelism.
    pub concurrency: usize,
    /// Print command stdout as it arrives.
    pub show_output: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    remote: Vec<String>,
    login: Option<RawLogin>,
    logger: Option<RawLogger>,
    concurrency: Option<usize>,
    #[serde(default)]
    output: bool,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawLogin {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLogger {
    output: Option<String>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, RolloutError> {
        let file = File::open(path)?;
        let raw: RawConfig = serde_yaml::from_reader(file)?;
        Self::validate(raw)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, RolloutError> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, RolloutError> {
        if raw.remote.is_empty() {
            return Err(RolloutError::Config(
                "You need to set your remote ip address".to_string(),
            ));
        }
        if raw.steps.is_empty() {
            return Err(RolloutError::Config("You need to set your steps".to_string()));
        }
        let login = match raw.login {
            Some(RawLogin {
                username: Some(username),
                password: Some(password),
            }) => Credentials { username, password },
            _ => {
                return Err(RolloutError::Config(
                    "You need to set your username and password in the login section".to_string(),
                ))
            }
        };
        let concurrency = raw.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(RolloutError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let logger_output_dir = raw
            .logger
            .and_then(|logger| logger.output)
            .unwrap_or_else(|| DEFAULT_LOGGER_OUTPUT.to_string())
            .into();
        let steps = raw
            .steps
            .into_iter()
            .enumerate()
            .map(|(position, step)| Step::from_raw(position, step))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: raw.name,
            remote: raw.remote,
            login,
            logger_output_dir,
            concurrency,
            show_output: raw.output,
            steps,
        })
    }
}
