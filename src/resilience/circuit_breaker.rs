//! Circuit breaker registry for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: instance assumed down, excluded from selection
//! - Half-Open: exactly one probe request may test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures reaches threshold
//! Open → Half-Open: first eligibility check at or after opened_at + reset_timeout
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - One record per instance id, created on the first observed failure
//! - Records are mutated under their own map entry lock; unrelated instances never contend
//! - The Open → Half-Open move is lazy; no background timer
//! - Outcomes of non-probe requests that finish while Open or Half-Open are stale and ignored
//! - A permit dropped without an outcome counts as a failure

use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::BreakerConfig;
use crate::discovery::InstanceId;
use crate::observability::metrics;

/// Breaker state of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerRecord {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Admin view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub instance: InstanceId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_for_ms: Option<u128>,
    pub probe_in_flight: bool,
}

/// Per-instance circuit breakers.
#[derive(Debug)]
pub struct BreakerRegistry {
    records: DashMap<InstanceId, BreakerRecord>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.reset_timeout_secs))
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Whether the instance may be offered to the selector.
    pub fn is_eligible(&self, id: &InstanceId) -> bool {
        self.is_eligible_at(id, Instant::now())
    }

    /// Eligible when Closed, or Half-Open with no probe in flight.
    /// An Open breaker whose cooldown has elapsed moves to Half-Open here.
    pub fn is_eligible_at(&self, id: &InstanceId, now: Instant) -> bool {
        let Some(mut record) = self.records.get_mut(id) else {
            return true;
        };
        self.promote_if_cooled(id, &mut record, now);
        match record.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !record.probe_in_flight,
            CircuitState::Open => false,
        }
    }

    /// Claim the right to send one request to the instance.
    ///
    /// In Half-Open the claim marks the probe as in flight, so a concurrent
    /// claim for the same instance fails until the probe resolves.
    pub fn try_acquire(self: &Arc<Self>, id: &InstanceId) -> Option<BreakerPermit> {
        self.try_acquire_at(id, Instant::now())
    }

    pub fn try_acquire_at(self: &Arc<Self>, id: &InstanceId, now: Instant) -> Option<BreakerPermit> {
        let probe = match self.records.get_mut(id) {
            None => false,
            Some(mut record) => {
                self.promote_if_cooled(id, &mut record, now);
                match record.state {
                    CircuitState::Closed => false,
                    CircuitState::HalfOpen if !record.probe_in_flight => {
                        record.probe_in_flight = true;
                        tracing::debug!(instance = %id, "Half-open probe claimed");
                        true
                    }
                    CircuitState::HalfOpen | CircuitState::Open => return None,
                }
            }
        };

        Some(BreakerPermit {
            registry: Arc::clone(self),
            instance: id.clone(),
            probe,
            resolved: false,
        })
    }

    /// Report a successful request that did not hold a probe permit.
    pub fn record_success(&self, id: &InstanceId) {
        self.apply_success(id, false);
    }

    /// Report a failed request (or health probe, when configured) that did not hold a probe permit.
    pub fn record_failure(&self, id: &InstanceId) {
        self.record_failure_at(id, Instant::now());
    }

    pub fn record_failure_at(&self, id: &InstanceId, now: Instant) {
        self.apply_failure(id, false, now);
    }

    fn apply_success(&self, id: &InstanceId, probe: bool) {
        let Some(mut record) = self.records.get_mut(id) else {
            return;
        };
        match record.state {
            CircuitState::Closed => record.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                *record = BreakerRecord::closed();
                tracing::info!(instance = %id, "Circuit closed after successful probe");
                metrics::record_breaker_transition(CircuitState::Closed.as_str());
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn apply_failure(&self, id: &InstanceId, probe: bool, now: Instant) {
        let mut record = self.records.entry(id.clone()).or_insert_with(BreakerRecord::closed);
        match record.state {
            CircuitState::Closed => {
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                if record.consecutive_failures >= self.failure_threshold {
                    record.state = CircuitState::Open;
                    record.opened_at = Some(now);
                    tracing::warn!(
                        instance = %id,
                        failures = record.consecutive_failures,
                        cooldown = ?self.reset_timeout,
                        "Circuit opened"
                    );
                    metrics::record_breaker_transition(CircuitState::Open.as_str());
                }
            }
            CircuitState::HalfOpen if probe => {
                record.state = CircuitState::Open;
                record.opened_at = Some(now);
                record.probe_in_flight = false;
                tracing::warn!(instance = %id, cooldown = ?self.reset_timeout, "Probe failed, circuit re-opened");
                metrics::record_breaker_transition(CircuitState::Open.as_str());
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn promote_if_cooled(&self, id: &InstanceId, record: &mut BreakerRecord, now: Instant) {
        if record.state != CircuitState::Open {
            return;
        }
        let cooled = record
            .opened_at
            .map(|opened| now.saturating_duration_since(opened) >= self.reset_timeout)
            .unwrap_or(true);
        if cooled {
            record.state = CircuitState::HalfOpen;
            record.probe_in_flight = false;
            tracing::info!(instance = %id, "Circuit half-open, awaiting probe");
            metrics::record_breaker_transition(CircuitState::HalfOpen.as_str());
        }
    }

    /// Stored state without applying the lazy cooldown transition.
    pub fn state(&self, id: &InstanceId) -> CircuitState {
        self.records
            .get(id)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, id: &InstanceId) -> u32 {
        self.records
            .get(id)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget records for instances `keep` rejects. Returns how many were removed.
    pub fn sweep(&self, keep: impl Fn(&InstanceId) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|id, record| record.probe_in_flight || keep(id));
        before.saturating_sub(self.records.len())
    }

    pub fn snapshot_at(&self, now: Instant) -> Vec<BreakerSnapshot> {
        let mut out: Vec<BreakerSnapshot> = self
            .records
            .iter()
            .map(|entry| BreakerSnapshot {
                instance: entry.key().clone(),
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                open_for_ms: entry
                    .opened_at
                    .filter(|_| entry.state == CircuitState::Open)
                    .map(|opened| now.saturating_duration_since(opened).as_millis()),
                probe_in_flight: entry.probe_in_flight,
            })
            .collect();
        out.sort_by(|a, b| a.instance.cmp(&b.instance));
        out
    }
}

/// Right to send one request to an instance, resolved exactly once.
///
/// Dropping an unresolved permit (cancelled request, deadline) records a failure.
#[derive(Debug)]
pub struct BreakerPermit {
    registry: Arc<BreakerRegistry>,
    instance: InstanceId,
    probe: bool,
    resolved: bool,
}

impl BreakerPermit {
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Whether this permit is the single Half-Open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.registry.apply_success(&self.instance, self.probe);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.registry.apply_failure(&self.instance, self.probe, Instant::now());
    }

    /// Resolve with an explicit timestamp (tests).
    pub fn fail_at(mut self, now: Instant) {
        self.resolved = true;
        self.registry.apply_failure(&self.instance, self.probe, now);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::debug!(instance = %self.instance, probe = self.probe, "Request abandoned before outcome, counting as failure");
            self.registry.apply_failure(&self.instance, self.probe, Instant::now());
        }
    }
}
