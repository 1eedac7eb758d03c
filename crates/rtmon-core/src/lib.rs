//! rtmon-core: sampling pipeline shared by the rtmond daemon.
//!
//! Provides:
//! - `collector`: metric sources over `/proc` and `/sys` (cpu, cpufreq, mem, disk, net, ib)
//! - `pipeline`: per-metric producer/consumer driver and rate tracking
//! - `sink`: binary file output and batched HTTP line-protocol delivery
//! - `lifecycle`: process-wide pause/resume/stop state
//! - `queue`: closable blocking handoff queue
//! - `sample`: what a sink needs from a snapshot
//! - `config`: validated monitor configuration
//! - `supervisor`: trigger loop and bounded shutdown
//! - `util`: helper utilities

pub mod collector;
pub mod config;
pub mod lifecycle;
pub mod pipeline;
pub mod queue;
pub mod sample;
pub mod sink;
pub mod supervisor;
pub mod util;
