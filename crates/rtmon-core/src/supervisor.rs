//! Top-level control loop: applies lifecycle triggers and joins pipelines
//! on the way out.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::lifecycle::{LifecycleController, Trigger};
use crate::pipeline::PipelineHandle;

/// How often the loop checks whether every pipeline ended on its own.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every pipeline thread was joined.
    Clean,
    /// At least one pipeline was still running at the deadline.
    DeadlineExceeded,
}

pub struct Supervisor {
    lifecycle: Arc<LifecycleController>,
    pipelines: Vec<PipelineHandle>,
    shutdown_timeout: Duration,
}

impl Supervisor {
    pub fn new(lifecycle: Arc<LifecycleController>, shutdown_timeout: Duration) -> Self {
        Self {
            lifecycle,
            pipelines: Vec::new(),
            shutdown_timeout,
        }
    }

    pub fn add(&mut self, pipeline: PipelineHandle) {
        debug!(metric = pipeline.name(), "pipeline registered");
        self.pipelines.push(pipeline);
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Applies triggers until `Terminate`, until the channel closes, or until
    /// every pipeline has exited on its own. Then shuts down.
    pub fn run(self, triggers: Receiver<Trigger>) -> ShutdownOutcome {
        loop {
            match triggers.recv_timeout(POLL_INTERVAL) {
                Ok(Trigger::Terminate) => {
                    info!("termination requested");
                    break;
                }
                Ok(trigger) => self.lifecycle.apply(trigger),
                Err(RecvTimeoutError::Timeout) => {
                    if self.pipelines.iter().all(PipelineHandle::is_finished) {
                        warn!("all pipelines have exited");
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("trigger channel closed");
                    break;
                }
            }
        }
        self.shutdown()
    }

    /// Stops the lifecycle and joins every pipeline against one deadline.
    pub fn shutdown(mut self) -> ShutdownOutcome {
        self.lifecycle.stop();
        let deadline = Instant::now() + self.shutdown_timeout;

        let mut stuck = Vec::new();
        for pipeline in &mut self.pipelines {
            if !pipeline.join_until(deadline) {
                stuck.push(pipeline.name());
            }
        }

        if stuck.is_empty() {
            info!("shutdown complete");
            ShutdownOutcome::Clean
        } else {
            error!(
                "pipelines still running after {:?}: {}",
                self.shutdown_timeout,
                stuck.join(", ")
            );
            ShutdownOutcome::DeadlineExceeded
        }
    }
}
