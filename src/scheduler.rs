//! Debounced preview scheduling and stale-response detection.
//!
//! ## Tokens, not arrival order
//!
//! Every preview request gets a [`PreviewToken`] from a monotonically
//! increasing counter. Responses may arrive in any order; only the one
//! carrying the latest issued token may touch the view. Anything older is
//! discarded without comment.
//!
//! ## Debounce
//!
//! [`DebounceTimer`] is a trailing-edge timer over `tokio::time`: each
//! [`DebounceTimer::schedule`] pushes the deadline out to `now + window`, and
//! [`DebounceTimer::expired`] resolves once the deadline passes with no
//! further reschedule. Under `tokio::time::pause` tests move the clock
//! explicitly.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identifier attached to one preview request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PreviewToken(u64);

impl PreviewToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Cancellable trailing-edge timer.
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)start the window from now.
    pub fn schedule(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the current deadline passes. Never resolves while idle.
    ///
    /// The deadline is read once at call time; callers re-create the future
    /// after rescheduling, as `tokio::select!` loops naturally do.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Decides when a preview request is due and whether a response is current.
#[derive(Debug)]
pub struct PreviewScheduler {
    timer: DebounceTimer,
    issued: u64,
    latest: Option<PreviewToken>,
    halted: bool,
}

impl PreviewScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            timer: DebounceTimer::new(window),
            issued: 0,
            latest: None,
            halted: false,
        }
    }

    /// A parameter changed. Restarts the debounce window.
    ///
    /// Returns `false`, scheduling nothing, when no file is loaded or
    /// scheduling is halted after a server-reported error.
    pub fn notify_changed(&mut self, loaded: bool) -> bool {
        if !loaded {
            return false;
        }
        if self.halted {
            trace!("preview scheduling halted; change not scheduled");
            return false;
        }
        self.timer.schedule();
        true
    }

    /// Explicit user action: skip the debounce and issue a token now.
    ///
    /// Clears a halt, since the user asked for a fresh preview.
    pub fn force_refresh(&mut self, loaded: bool) -> Option<PreviewToken> {
        if !loaded {
            return None;
        }
        self.timer.cancel();
        self.resume();
        Some(self.issue())
    }

    /// The debounce window elapsed: issue the token for the pending request.
    pub fn fire(&mut self, loaded: bool) -> Option<PreviewToken> {
        let was_pending = self.timer.is_pending();
        self.timer.cancel();
        if !loaded || self.halted || !was_pending {
            return None;
        }
        Some(self.issue())
    }

    pub fn is_current(&self, token: PreviewToken) -> bool {
        self.latest == Some(token)
    }

    pub fn latest(&self) -> Option<PreviewToken> {
        self.latest
    }

    /// Stop debounced scheduling until the next explicit action.
    pub fn halt(&mut self) {
        debug!("halting preview scheduling");
        self.halted = true;
        self.timer.cancel();
    }

    /// Re-enable debounced scheduling after a halt.
    pub fn resume(&mut self) {
        if self.halted {
            debug!("resuming preview scheduling");
        }
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Forget the pending window and the latest token. The counter keeps
    /// counting, so responses to requests issued before the reset are stale.
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.latest = None;
        self.resume();
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub async fn expired(&self) {
        self.timer.expired().await
    }

    fn issue(&mut self) -> PreviewToken {
        self.issued += 1;
        let token = PreviewToken(self.issued);
        self.latest = Some(token);
        trace!("issued preview token {}", token.0);
        token
    }
}
