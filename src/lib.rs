//! Rollout: A Batched Multi-Host Deployment Step Runner.

// Serde helper module.
mod serde;
// Command line arguments and configuration.
pub mod config;
// How to represent hosts.
pub mod host;
// How to parse and represent steps.
pub mod step;
// What a run reports back.
pub mod result;
// The interface to remote hosts.
pub mod transport;
// SSH transport.
pub mod session;
// Log sinks.
pub mod logger;
// Step to transport call.
pub mod dispatch;
// Wave scheduling.
pub mod scheduler;
// Error handling.
pub mod error;

pub use config::{Cli, Config, Credentials};
pub use dispatch::Dispatcher;
pub use error::RolloutError;
pub use host::Host;
pub use logger::{ConsoleLogger, Logger};
pub use result::{FleetOutcome, HostRunOutcome, StepResult, Summary};
pub use scheduler::{waves, Fleet};
pub use session::SshTransport;
pub use step::{substitute, CommandStep, DirectoryStep, FilePair, FileStep, Step};
pub use transport::{
    CommandOutcome, Connection, ElevatedRequest, ExecRequest, OutputSink, OutputStream, Transport,
};
