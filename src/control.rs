use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_with::{DeserializeFromStr, SerializeDisplay};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::InvalidControlState;

/// Default minimum spacing between two reconnect-triggered resends.
pub const DEFAULT_MIN_RESEND_INTERVAL: Duration = Duration::from_secs(1);

const ACTIVATE: &str = "activate";
const DEACTIVATE: &str = "deactivate";

/// The operator's desired device activation state.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub enum ControlState {
    /// No intent declared; nothing is ever published.
    #[default]
    Unset,
    /// The device should be active.
    Activate,
    /// The device should be inactive.
    Deactivate,
}

impl ControlState {
    /// Returns the control-topic payload, or `None` for [`ControlState::Unset`].
    ///
    /// ```
    /// use mqrelay::ControlState;
    ///
    /// assert_eq!(Some("activate"), ControlState::Activate.payload());
    /// assert_eq!(None, ControlState::Unset.payload());
    /// ```
    #[must_use]
    pub const fn payload(self) -> Option<&'static str> {
        match self {
            Self::Unset => None,
            Self::Activate => Some(ACTIVATE),
            Self::Deactivate => Some(DEACTIVATE),
        }
    }

    /// Returns whether an intent has been declared.
    #[must_use]
    pub const fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.payload().unwrap_or("unset"))
    }
}

impl FromStr for ControlState {
    type Err = InvalidControlState;

    /// Parses `activate` / `deactivate`, ignoring case and surrounding whitespace.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value.trim();
        if normalised.eq_ignore_ascii_case(ACTIVATE) {
            Ok(Self::Activate)
        } else if normalised.eq_ignore_ascii_case(DEACTIVATE) {
            Ok(Self::Deactivate)
        } else {
            Err(InvalidControlState {
                value: value.to_string(),
            })
        }
    }
}

/// Rate limiter for control-state resends.
#[derive(Debug, Clone)]
pub struct ResendThrottle {
    min_interval: Duration,
    last_resend: Option<Instant>,
}

impl ResendThrottle {
    /// Creates a throttle that has never fired.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_resend: None,
        }
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns when the throttle last fired.
    #[must_use]
    pub fn last_resend(&self) -> Option<Instant> {
        self.last_resend
    }

    /// Fires if the window since the last resend has elapsed, stamping `now`.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_resend
            && now.saturating_duration_since(last) < self.min_interval
        {
            return false;
        }
        self.last_resend = Some(now);
        true
    }

    /// Stamps `now` unconditionally.
    pub fn arm(&mut self, now: Instant) {
        self.last_resend = Some(now);
    }
}

impl Default for ResendThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RESEND_INTERVAL)
    }
}

/// Decides when the desired control state must be (re)published.
///
/// The reconciler never talks to the broker itself: each decision returns the
/// state to publish and the caller performs the publish.
#[derive(Debug, Clone, Default)]
pub struct ControlReconciler {
    state: ControlState,
    throttle: ResendThrottle,
}

impl ControlReconciler {
    /// Creates a reconciler with an initial state and resend interval.
    #[must_use]
    pub fn new(state: ControlState, min_resend_interval: Duration) -> Self {
        Self {
            state,
            throttle: ResendThrottle::new(min_resend_interval),
        }
    }

    /// Returns the desired state.
    #[must_use]
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Returns the resend throttle.
    #[must_use]
    pub fn throttle(&self) -> &ResendThrottle {
        &self.throttle
    }

    /// Replaces the desired state. Returns whether it changed.
    pub fn set_state(&mut self, state: ControlState) -> bool {
        let changed = self.state != state;
        self.state = state;
        changed
    }

    /// Returns the state to publish at startup, bypassing the throttle.
    #[must_use]
    pub fn initial_publish(&self) -> Option<ControlState> {
        self.state.is_set().then_some(self.state)
    }

    /// Returns the state to resend after a reconnect notice, if any.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use mqrelay::{ControlReconciler, ControlState};
    /// use tokio::time::Instant;
    ///
    /// let mut reconciler = ControlReconciler::new(ControlState::Activate, Duration::from_secs(1));
    /// let now = Instant::now();
    /// assert_eq!(Some(ControlState::Activate), reconciler.maybe_resend(now));
    /// assert_eq!(None, reconciler.maybe_resend(now + Duration::from_millis(500)));
    /// ```
    pub fn maybe_resend(&mut self, now: Instant) -> Option<ControlState> {
        if !self.state.is_set() {
            debug!("control state unset; skipping resend");
            return None;
        }
        if !self.throttle.try_acquire(now) {
            debug!(state = %self.state, "resend suppressed inside throttle window");
            return None;
        }
        Some(self.state)
    }

    /// Records an explicit operator command that is being published now.
    pub fn record_operator_command(&mut self, state: ControlState, now: Instant) {
        self.state = state;
        self.throttle.arm(now);
    }
}

/// Shared, lock-protected access to one [`ControlReconciler`].
///
/// Every decision happens under the lock and the lock is released before the
/// caller publishes.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    inner: Arc<Mutex<ControlReconciler>>,
}

impl ControlHandle {
    /// Wraps a reconciler for shared use.
    #[must_use]
    pub fn new(reconciler: ControlReconciler) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reconciler)),
        }
    }

    /// Returns the current desired state.
    #[must_use]
    pub fn state(&self) -> ControlState {
        self.lock().state()
    }

    /// Replaces the desired state without publishing.
    #[instrument(skip(self), level = "debug")]
    pub fn set_state(&self, state: ControlState) -> bool {
        self.lock().set_state(state)
    }

    /// See [`ControlReconciler::initial_publish`].
    #[must_use]
    pub fn initial_publish(&self) -> Option<ControlState> {
        self.lock().initial_publish()
    }

    /// See [`ControlReconciler::maybe_resend`].
    pub fn maybe_resend(&self, now: Instant) -> Option<ControlState> {
        self.lock().maybe_resend(now)
    }

    /// See [`ControlReconciler::record_operator_command`].
    pub fn record_operator_command(&self, state: ControlState, now: Instant) {
        self.lock().record_operator_command(state, now);
    }

    fn lock(&self) -> MutexGuard<'_, ControlReconciler> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[rstest]
    #[case("activate", ControlState::Activate)]
    #[case("  DeActivate ", ControlState::Deactivate)]
    #[case("ACTIVATE", ControlState::Activate)]
    fn control_state_parses_case_insensitively(
        #[case] raw: &str,
        #[case] expected: ControlState,
    ) {
        assert_eq!(Ok(expected), raw.parse::<ControlState>());
    }

    #[rstest]
    #[case("unset")]
    #[case("on")]
    #[case("")]
    fn control_state_rejects_unknown_values(#[case] raw: &str) {
        assert_matches!(raw.parse::<ControlState>(), Err(InvalidControlState { value }) if value == raw);
    }

    #[test]
    fn unset_never_resends() {
        let mut reconciler = ControlReconciler::new(ControlState::Unset, WINDOW);
        let start = Instant::now();
        for step in 0..10u32 {
            assert_eq!(None, reconciler.maybe_resend(start + WINDOW * step));
        }
        assert_eq!(None, reconciler.throttle().last_resend());
    }

    #[test]
    fn two_notices_inside_window_resend_once() {
        let mut reconciler = ControlReconciler::new(ControlState::Activate, WINDOW);
        let start = Instant::now();

        let fired = [
            reconciler.maybe_resend(start),
            reconciler.maybe_resend(start + Duration::from_millis(500)),
        ];

        assert_eq!([Some(ControlState::Activate), None], fired);
    }

    #[test]
    fn notices_after_window_resend_again() {
        let mut reconciler = ControlReconciler::new(ControlState::Deactivate, WINDOW);
        let start = Instant::now();

        assert_eq!(Some(ControlState::Deactivate), reconciler.maybe_resend(start));
        assert_eq!(None, reconciler.maybe_resend(start + Duration::from_millis(999)));
        assert_eq!(
            Some(ControlState::Deactivate),
            reconciler.maybe_resend(start + WINDOW)
        );
    }

    #[test]
    fn initial_publish_ignores_and_leaves_throttle_untouched() {
        let mut reconciler = ControlReconciler::new(ControlState::Activate, WINDOW);
        assert_eq!(Some(ControlState::Activate), reconciler.initial_publish());
        assert_eq!(None, reconciler.throttle().last_resend());
        assert_eq!(
            Some(ControlState::Activate),
            reconciler.maybe_resend(Instant::now())
        );
    }

    #[test]
    fn initial_publish_is_empty_when_unset() {
        let reconciler = ControlReconciler::default();
        assert_eq!(None, reconciler.initial_publish());
    }

    #[test]
    fn operator_command_arms_throttle_and_updates_state() {
        let mut reconciler = ControlReconciler::new(ControlState::Unset, WINDOW);
        let start = Instant::now();

        reconciler.record_operator_command(ControlState::Deactivate, start);

        assert_eq!(ControlState::Deactivate, reconciler.state());
        assert_eq!(None, reconciler.maybe_resend(start + Duration::from_millis(200)));
        assert_eq!(
            Some(ControlState::Deactivate),
            reconciler.maybe_resend(start + Duration::from_secs(2))
        );
    }

    #[test]
    fn set_state_reports_changes_without_arming() {
        let mut reconciler = ControlReconciler::new(ControlState::Activate, WINDOW);
        assert!(!reconciler.set_state(ControlState::Activate));
        assert!(reconciler.set_state(ControlState::Deactivate));
        assert_eq!(None, reconciler.throttle().last_resend());
    }

    #[test]
    fn handle_observes_state_set_through_clone() {
        let handle = ControlHandle::new(ControlReconciler::new(ControlState::Unset, WINDOW));
        let other = handle.clone();

        other.set_state(ControlState::Activate);

        assert_eq!(ControlState::Activate, handle.state());
        assert_eq!(
            Some(ControlState::Activate),
            handle.maybe_resend(Instant::now())
        );
    }

    #[tokio::test]
    async fn concurrent_notices_fire_once_per_window() {
        let handle = ControlHandle::new(ControlReconciler::new(ControlState::Activate, WINDOW));
        let now = Instant::now();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.maybe_resend(now) })
            })
            .collect();

        let mut fired = 0;
        for task in tasks {
            if task.await.expect("resend task should not panic").is_some() {
                fired += 1;
            }
        }
        assert_eq!(1, fired);
    }
}
