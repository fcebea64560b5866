use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use lumen_contracts::StudioError;

use crate::{GenerationService, OperationHandle, OperationStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoPollPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for VideoPollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub attempt: u32,
    pub elapsed: Duration,
}

pub fn wait_for_video(
    service: &dyn GenerationService,
    handle: &OperationHandle,
    policy: &VideoPollPolicy,
    cancel: &CancelFlag,
    mut on_pending: impl FnMut(PollProgress) -> Result<()>,
) -> Result<String> {
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(StudioError::Cancelled.into());
        }
        attempt = attempt.saturating_add(1);
        match service.poll_video(handle)? {
            OperationStatus::Done {
                video_uri: Some(uri),
            } => return Ok(uri),
            OperationStatus::Done { video_uri: None } => {
                return Err(StudioError::MissingVideoUri.into())
            }
            OperationStatus::Pending => {}
        }
        on_pending(PollProgress {
            attempt,
            elapsed: started.elapsed(),
        })?;

        let deadline = policy.timeout.map(|timeout| started + timeout);
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(timed_out(policy).into());
            }
        }
        sleep_unless_cancelled(policy.interval, deadline, cancel)?;
    }
}

fn timed_out(policy: &VideoPollPolicy) -> StudioError {
    StudioError::TimedOut {
        seconds: policy.timeout.unwrap_or_default().as_secs_f64(),
    }
}

fn sleep_unless_cancelled(
    interval: Duration,
    deadline: Option<Instant>,
    cancel: &CancelFlag,
) -> Result<()> {
    let wake_at = Instant::now() + interval;
    let wake_at = match deadline {
        Some(deadline) if deadline < wake_at => deadline,
        _ => wake_at,
    };
    loop {
        if cancel.is_cancelled() {
            return Err(StudioError::Cancelled.into());
        }
        let now = Instant::now();
        if now >= wake_at {
            return Ok(());
        }
        thread::sleep((wake_at - now).min(SLEEP_SLICE));
    }
}
