//! OS signal wiring.
//!
//! SIGUSR1 pauses sampling, SIGUSR2 resumes it, SIGINT/SIGTERM/SIGHUP
//! terminate. All of them end up as [`Trigger`]s on one channel read by the
//! supervisor.

use std::io;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, info, warn};

use rtmon_core::lifecycle::Trigger;

/// Blocks SIGUSR1 and SIGUSR2 in the calling thread.
///
/// Must run before any other thread is spawned so every thread inherits the
/// mask and the signals stay pending until the listener collects them.
pub fn block_control_signals() -> nix::Result<SigSet> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGUSR1);
    set.add(Signal::SIGUSR2);
    set.thread_block()?;
    Ok(set)
}

fn trigger_for(signal: Signal) -> Option<Trigger> {
    match signal {
        Signal::SIGUSR1 => Some(Trigger::Pause),
        Signal::SIGUSR2 => Some(Trigger::Resume),
        _ => None,
    }
}

/// Spawns the thread that waits for the blocked control signals.
pub fn spawn_listener(set: SigSet, triggers: Sender<Trigger>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            loop {
                let signal = match set.wait() {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!("sigwait failed, pause/resume signals disabled: {}", e);
                        return;
                    }
                };
                let Some(trigger) = trigger_for(signal) else {
                    debug!("ignoring {}", signal);
                    continue;
                };
                info!("received {}", signal);
                if triggers.send(trigger).is_err() {
                    return;
                }
            }
        })
}

/// Routes SIGINT, SIGTERM and SIGHUP to [`Trigger::Terminate`].
pub fn install_termination_handler(triggers: Sender<Trigger>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        let _ = triggers.send(Trigger::Terminate);
    })
}
