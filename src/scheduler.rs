//! Wave scheduling.
//!
//! Hosts are split into contiguous waves of `concurrency` hosts. All hosts in
//! a wave run at the same time, each in its own tokio task, and the next wave
//! only starts once every task of the current one has finished. This is what
//! bounds the number of live connections.

use std::ops::Range;
use std::sync::Arc;

use futures::future::join_all;

use crate::config::{Config, Credentials};
use crate::dispatch::Dispatcher;
use crate::error::RolloutError;
use crate::host::{hosts_with_colors, Host};
use crate::logger::Logger;
use crate::result::{FleetOutcome, HostRunOutcome};
use crate::step::Step;
use crate::transport::Transport;

/// Index ranges of the waves for `len` hosts. Every wave but the last holds
/// exactly `concurrency` hosts.
pub fn waves(len: usize, concurrency: usize) -> Vec<Range<usize>> {
    let size = concurrency.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Runs the same steps on every host of a fleet.
#[derive(Clone)]
pub struct Fleet {
    transport: Arc<dyn Transport>,
    logger: Arc<dyn Logger>,
    steps: Arc<[Step]>,
    credentials: Arc<Credentials>,
    concurrency: usize,
    show_output: bool,
}

impl Fleet {
    pub fn new(
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        steps: Vec<Step>,
        credentials: Credentials,
    ) -> Self {
        Self {
            transport,
            logger,
            steps: steps.into(),
            credentials: Arc::new(credentials),
            concurrency: 1,
            show_output: false,
        }
    }

    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self::new(
            transport,
            logger,
            config.steps.clone(),
            config.login.clone(),
        )
        .with_concurrency(config.concurrency)
        .with_show_output(config.show_output)
    }

    /// Hosts per wave. Values below 1 are treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_show_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every step on every host, wave by wave.
    ///
    /// Never fails: hosts that could not connect or that stopped early simply
    /// have fewer results.
    pub async fn run(&self, addresses: &[String]) -> FleetOutcome {
        let hosts = hosts_with_colors(addresses);
        let waves = waves(hosts.len(), self.concurrency);
        let num_waves = waves.len();
        let mut outcome = FleetOutcome::new();

        for (wave_index, range) in waves.into_iter().enumerate() {
            let wave = &hosts[range];
            self.logger.info(&format!(
                "Starting wave {}/{} ({} host(s))",
                wave_index + 1,
                num_waves,
                wave.len()
            ));

            let mut tasks = Vec::with_capacity(wave.len());
            for (host, color) in wave {
                let fleet = self.clone();
                let host = host.clone();
                let label = host.prettify(color).to_string();
                tasks.push(tokio::spawn(async move { fleet.run_host(&host, &label).await }));
            }

            // Wait for the whole wave before starting the next one.
            let mut results = Vec::with_capacity(wave.len());
            for ((host, _), joined) in wave.iter().zip(join_all(tasks).await) {
                match joined {
                    Ok(host_outcome) => results.push(host_outcome),
                    Err(e) => {
                        self.logger
                            .error(&format!("{} Host task failed: {}", host, e));
                        results.push(Vec::new());
                    }
                }
            }
            outcome.push_wave(results);
        }

        outcome
    }

    /// Connects to `host` and runs all steps on it in order.
    ///
    /// Errors are logged, not returned. An invalid step is skipped; any other
    /// failure ends the session and keeps the results collected so far.
    pub async fn run_host(&self, host: &Host, label: &str) -> HostRunOutcome {
        let mut results = Vec::new();
        let connection = match self
            .transport
            .connect(&host.address, &self.credentials)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                self.logger.error(&format!("{} {}", label, e));
                return results;
            }
        };
        self.logger.warning(&format!("{} Connected to host.", label));

        let dispatcher = Dispatcher::new(
            connection.as_ref(),
            host,
            label,
            self.logger.as_ref(),
            &self.credentials,
            self.concurrency,
            self.show_output,
        );
        for (position, step) in self.steps.iter().enumerate() {
            match dispatcher.dispatch(position, step).await {
                Ok(result) => results.push(result),
                Err(e @ RolloutError::InvalidStep { .. }) => {
                    self.logger.error(&format!("{} {}", label, e));
                }
                Err(e) => {
                    self.logger
                        .error(&format!("{} {}. Skipping remaining steps.", label, e));
                    break;
                }
            }
        }

        self.logger
            .info(&format!("{} Terminating connection.", label));
        if let Err(e) = connection.close().await {
            self.logger
                .error(&format!("{} Error while terminating: {}", label, e));
        }
        results
    }
}
