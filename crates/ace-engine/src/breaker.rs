use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self { state: State::Closed, consecutive_failures: 0, opened_at: None }
    }
}

/// Rate-limits provisioning attempts on sustained failure (spec.md §4.8).
/// Keyed by provisioning context ("general" vs "replacement") so a storm of
/// replacement failures does not block ordinary scale-up, and vice versa —
/// mirrors `circuit_breaker_manager`'s per-context tracking in the original.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self { failure_threshold, recovery_timeout, states: Mutex::new(HashMap::new()) }
    }

    /// Whether a provisioning attempt under `context` is currently allowed.
    /// Transitions Open -> HalfOpen once the recovery timeout has elapsed,
    /// allowing exactly one probe attempt through.
    pub fn can_provision(&self, context: &str) -> bool {
        let mut states = self.states.lock().unwrap();
        let entry = states.entry(context.to_owned()).or_default();
        match entry.state {
            State::Closed => true,
            State::HalfOpen => true,
            State::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_timeout {
                    entry.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, context: &str) {
        let mut states = self.states.lock().unwrap();
        let entry = states.entry(context.to_owned()).or_default();
        entry.state = State::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
    }

    pub fn record_failure(&self, context: &str) {
        let mut states = self.states.lock().unwrap();
        let entry = states.entry(context.to_owned()).or_default();
        entry.consecutive_failures += 1;
        if entry.state == State::HalfOpen || entry.consecutive_failures >= self.failure_threshold {
            entry.state = State::Open;
            entry.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self, context: &str) -> bool {
        self.states.lock().unwrap().get(context).map(|s| s.state == State::Open).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.can_provision("general"));
        breaker.record_failure("general");
        breaker.record_failure("general");
        assert!(breaker.can_provision("general"));
        breaker.record_failure("general");
        assert!(!breaker.can_provision("general"));
    }

    #[test]
    fn contexts_are_independent() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("replacement");
        assert!(!breaker.can_provision("replacement"));
        assert!(breaker.can_provision("general"));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("general");
        breaker.record_success("general");
        breaker.record_failure("general");
        assert!(breaker.can_provision("general"));
    }
}
