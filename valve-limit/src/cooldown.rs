use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::Reason;

/// A process-wide gate that admits at most one request per cooldown period.
///
/// Construct it once at startup and share it through `Arc`. Only the "is a request
/// already inside the cooldown window" check is serialized, with a single
/// compare-and-swap; request execution is never held up.
#[derive(Debug)]
pub struct CooldownGate {
    period_ns: u64,
    /// Nanoseconds (plus one) from `anchor` of the last admitted request; 0 = never.
    last: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl CooldownGate {
    pub fn new(period: Duration) -> Self {
        Self::with_clock(period, Clock::new())
    }

    pub fn with_clock(period: Duration, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            period_ns: period.as_nanos() as u64,
            last: AtomicU64::new(0),
            clock,
            anchor,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
    }

    /// Admit the caller if the previous admission is at least one period old.
    pub fn try_enter(&self) -> ControlFlow<Reason> {
        let now = self.clock.now().duration_since(self.anchor).as_nanos() as u64 + 1;

        let outcome = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::Acquire, |last| {
                if last != 0 && now.saturating_sub(last) < self.period_ns {
                    None
                } else {
                    Some(now)
                }
            });

        match outcome {
            Ok(_) => ControlFlow::Continue(()),
            Err(last) => {
                let waited = now.saturating_sub(last);
                ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(self.period_ns.saturating_sub(waited)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn it_admits_one_request_per_period() {
        let (clock, mock) = Clock::mock();
        let gate = CooldownGate::with_clock(Duration::from_millis(100), clock);

        assert!(gate.try_enter().is_continue());
        mock.increment(Duration::from_millis(40));
        assert_eq!(
            gate.try_enter(),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_millis(60)
            })
        );

        mock.increment(Duration::from_millis(60));
        assert!(gate.try_enter().is_continue());
        assert!(gate.try_enter().is_break());
    }

    #[test]
    fn a_zero_period_never_rejects() {
        let gate = CooldownGate::new(Duration::ZERO);
        for _ in 0..10 {
            assert!(gate.try_enter().is_continue());
        }
    }

    #[test]
    fn test_cooldown_concurrency() {
        use std::thread;

        let (clock, _mock) = Clock::mock();
        let gate = Arc::new(CooldownGate::with_clock(Duration::from_secs(1), clock));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.try_enter())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_continue())
            .count();
        assert_eq!(admitted, 1, "exactly one request may enter a cooldown period");
    }
}
