//! Usage: Merged cancellation scope (caller token + internal timeout timer).
//!
//! The merged token is a child of the caller's token, so caller cancellation
//! propagates down while the timeout never cancels the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::TransportError;

pub const ABORT_REASON_CANCELLED: &str = "cancelled";
pub const ABORT_REASON_TIMEOUT: &str = "timeout";

#[derive(Debug)]
pub struct CancelScope {
    caller: Option<CancellationToken>,
    token: CancellationToken,
    timeout: Option<Duration>,
    timed_out: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl CancelScope {
    /// Arms the timeout timer (if any); must be called inside a tokio runtime when `timeout` is set.
    pub fn new(caller: Option<&CancellationToken>, timeout: Option<Duration>) -> Self {
        let token = caller
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let timeout = timeout.filter(|d| !d.is_zero());
        let timed_out = Arc::new(AtomicBool::new(false));

        let timer = timeout.map(|duration| {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        });

        Self {
            caller: caller.cloned(),
            token,
            timeout,
            timed_out,
            timer,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn caller_cancelled(&self) -> bool {
        self.caller
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// True only when the internal timer fired and the caller did not cancel.
    pub fn timed_out(&self) -> bool {
        self.timeout.is_some() && self.timed_out.load(Ordering::SeqCst) && !self.caller_cancelled()
    }

    pub fn abort_reason(&self) -> &'static str {
        if self.timed_out() {
            ABORT_REASON_TIMEOUT
        } else {
            ABORT_REASON_CANCELLED
        }
    }

    pub fn cancellation_error(&self) -> TransportError {
        match self.timeout {
            Some(timeout) if self.timed_out() => TransportError::Timeout {
                timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
            },
            _ => TransportError::Aborted,
        }
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
