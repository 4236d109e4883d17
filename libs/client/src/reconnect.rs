//! Reconnect state machine for the gateway client.
//!
//! `Disconnected -> Connecting -> Connected`; a failed attempt or a dropped
//! connection moves to `Backoff`, which retries after a jittered delay. Once
//! `max_attempts` consecutive failures have happened the machine parks in
//! `Disconnected` and reports itself exhausted.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Backoff { attempt: u32, delay: Duration },
}

impl ConnectionState {
    /// Short label suitable for a status indicator.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Backoff { .. } => "reconnecting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    /// Fraction of `base_delay` applied in either direction.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            jitter: 0.2,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return self.base_delay;
        }
        let factor = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
        self.base_delay.mul_f64(factor)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot {event} while {from:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: &'static str,
}

#[derive(Debug)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    failures: u32,
    exhausted: bool,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            failures: 0,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// True once the retry budget ran out. Only [`start`](Self::start)
    /// leaves this state.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Begin a fresh connection cycle from `Disconnected`.
    pub fn start(&mut self) -> Result<ConnectionState, InvalidTransition> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.invalid("start"));
        }
        self.failures = 0;
        self.exhausted = false;
        self.state = ConnectionState::Connecting { attempt: 1 };
        Ok(self.state)
    }

    pub fn connected(&mut self) -> Result<ConnectionState, InvalidTransition> {
        if !matches!(self.state, ConnectionState::Connecting { .. }) {
            return Err(self.invalid("connect"));
        }
        self.failures = 0;
        self.state = ConnectionState::Connected;
        Ok(self.state)
    }

    /// Record a failed attempt or a lost connection.
    pub fn failed<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<ConnectionState, InvalidTransition> {
        if !matches!(
            self.state,
            ConnectionState::Connecting { .. } | ConnectionState::Connected
        ) {
            return Err(self.invalid("fail"));
        }
        self.failures += 1;
        self.state = if self.failures >= self.policy.max_attempts {
            self.exhausted = true;
            ConnectionState::Disconnected
        } else {
            ConnectionState::Backoff {
                attempt: self.failures,
                delay: self.policy.delay(rng),
            }
        };
        Ok(self.state)
    }

    /// Leave `Backoff` once its delay has elapsed.
    pub fn retry(&mut self) -> Result<ConnectionState, InvalidTransition> {
        let ConnectionState::Backoff { attempt, .. } = self.state else {
            return Err(self.invalid("retry"));
        };
        self.state = ConnectionState::Connecting {
            attempt: attempt + 1,
        };
        Ok(self.state)
    }

    /// Deliberate close; does not count as a failure.
    pub fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.failures = 0;
    }

    fn invalid(&self, event: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.state,
            event,
        }
    }
}

impl Default for ReconnectMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn happy_path_connects() {
        let mut machine = ReconnectMachine::default();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(
            machine.start().unwrap(),
            ConnectionState::Connecting { attempt: 1 }
        );
        assert_eq!(machine.connected().unwrap(), ConnectionState::Connected);
        assert_eq!(machine.state().label(), "connected");
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut rng = rng();
        let mut machine = ReconnectMachine::default();
        machine.start().unwrap();

        for attempt in 1..5 {
            match machine.failed(&mut rng).unwrap() {
                ConnectionState::Backoff { attempt: a, .. } => assert_eq!(a, attempt),
                other => panic!("expected backoff, got {other:?}"),
            }
            assert_eq!(
                machine.retry().unwrap(),
                ConnectionState::Connecting {
                    attempt: attempt + 1
                }
            );
        }

        assert_eq!(
            machine.failed(&mut rng).unwrap(),
            ConnectionState::Disconnected
        );
        assert!(machine.is_exhausted());
        assert_eq!(machine.state().label(), "disconnected");
        assert!(machine.retry().is_err());
    }

    #[test]
    fn successful_connect_resets_the_budget() {
        let mut rng = rng();
        let mut machine = ReconnectMachine::default();
        machine.start().unwrap();
        for _ in 0..3 {
            machine.failed(&mut rng).unwrap();
            machine.retry().unwrap();
        }
        machine.connected().unwrap();

        match machine.failed(&mut rng).unwrap() {
            ConnectionState::Backoff { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn delay_stays_within_jitter_band() {
        let mut rng = rng();
        let policy = ReconnectPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay(&mut rng);
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1200), "{delay:?}");
        }
    }

    #[test]
    fn zero_jitter_is_fixed_delay() {
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay(&mut rng()), Duration::from_secs(1));
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let mut machine = ReconnectMachine::default();
        let err = machine.connected().unwrap_err();
        assert_eq!(err.from, ConnectionState::Disconnected);
        assert!(machine.failed(&mut rng()).is_err());

        machine.start().unwrap();
        assert!(machine.start().is_err());
    }

    #[test]
    fn close_returns_to_disconnected_without_exhausting() {
        let mut machine = ReconnectMachine::default();
        machine.start().unwrap();
        machine.connected().unwrap();
        machine.close();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.is_exhausted());
        assert!(machine.start().is_ok());
    }
}
