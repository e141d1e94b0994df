//! Signal handling: SIGTERM terminates, SIGUSR1 pauses, SIGUSR2 resumes.
//!
//! Handlers touch nothing but two atomic flags; the observation loop polls
//! them cooperatively at the top of each iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::error::{Result, SchedulerError};

/// The two flags signal handlers may set.
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    pause: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> SignalFlags {
        SignalFlags::default()
    }

    pub fn paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, value: bool) {
        self.pause.store(value, Ordering::SeqCst);
    }

    pub fn set_terminated(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }
}

/// Install the three handlers. Failure to install is fatal at startup.
pub fn install_signal_handlers(flags: &SignalFlags) -> Result<()> {
    let mut term = signal(SignalKind::terminate())
        .map_err(|e| SchedulerError::FatalState(format!("cannot install SIGTERM handler: {e}")))?;
    let mut pause = signal(SignalKind::user_defined1())
        .map_err(|e| SchedulerError::FatalState(format!("cannot install SIGUSR1 handler: {e}")))?;
    let mut resume = signal(SignalKind::user_defined2())
        .map_err(|e| SchedulerError::FatalState(format!("cannot install SIGUSR2 handler: {e}")))?;

    let terminate_flag = flags.terminate.clone();
    tokio::spawn(async move {
        while term.recv().await.is_some() {
            log::warn!("terminate signal received");
            terminate_flag.store(true, Ordering::SeqCst);
        }
    });

    let pause_flag = flags.pause.clone();
    tokio::spawn(async move {
        while pause.recv().await.is_some() {
            log::warn!("pause signal received");
            pause_flag.store(true, Ordering::SeqCst);
        }
    });

    let resume_flag = flags.pause.clone();
    tokio::spawn(async move {
        while resume.recv().await.is_some() {
            log::warn!("resume signal received");
            resume_flag.store(false, Ordering::SeqCst);
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear_and_toggle() {
        let flags = SignalFlags::new();
        assert!(!flags.paused());
        assert!(!flags.terminated());

        flags.set_paused(true);
        assert!(flags.paused());
        flags.set_paused(false);
        assert!(!flags.paused());

        flags.set_terminated();
        assert!(flags.terminated());
    }

    #[test]
    fn clones_share_state() {
        let flags = SignalFlags::new();
        let other = flags.clone();
        flags.set_paused(true);
        assert!(other.paused());
    }
}
