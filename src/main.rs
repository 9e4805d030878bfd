use std::sync::Arc;

use clap::Parser;

use rollout_ssh::{Cli, Config, ConsoleLogger, Fleet, Logger, RolloutError, SshTransport};

#[tokio::main]
async fn main() -> Result<(), RolloutError> {
    let cli = Cli::parse();
    let logger = Arc::new(ConsoleLogger::new());

    logger.info(&format!("Read file {}", cli.config.display()));
    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logger.error(&e.to_string());
            return Err(e);
        }
    };
    logger.info(&format!(
        "Starting job '{}' on {} host(s), {} at a time",
        config.name,
        config.remote.len(),
        config.concurrency
    ));

    let fleet = Fleet::from_config(&config, Arc::new(SshTransport), logger.clone());
    let outcome = fleet.run(&config.remote).await;

    let summary = outcome.summary();
    let message = format!(
        "Finished: {} host(s), {} step result(s), {} failed",
        summary.hosts, summary.results, summary.failed
    );
    if summary.failed == 0 {
        logger.info(&message);
    } else {
        logger.warning(&message);
    }
    let report = outcome.write_yaml(&config.logger_output_dir, &config.name)?;
    logger.info(&format!("Results written to {}", report.display()));

    println!("ok");
    Ok(())
}
