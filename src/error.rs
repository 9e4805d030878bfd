use thiserror::Error;

#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to parse configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Local I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to execute SSH command: {0}")]
    Ssh(#[from] openssh::Error),
    #[error("Failed to connect to {host}: {source}")]
    Connection {
        host: String,
        #[source]
        source: openssh::Error,
    },
    #[error("Step failed on {host}: {message}")]
    StepExecution { host: String, message: String },
    #[error("Step {position} has none of 'run', 'files' or 'directory'")]
    InvalidStep { position: usize },
    #[error("Failed to upload {path} to {host}: {message}")]
    Upload {
        host: String,
        path: String,
        message: String,
    },
}
