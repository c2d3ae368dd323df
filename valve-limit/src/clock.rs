use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use quanta::Clock;
use quanta::Instant;

/// Wall-clock time of the calling process, expressed as time since the Unix epoch.
///
/// The default clock reads the system time on every call, so steps and slews
/// applied to the host clock are seen straight away. [`WallClock::with_clock`]
/// instead advances a fixed epoch with a `quanta` clock, which can be mocked for
/// deterministic tests.
#[derive(Clone, Debug, Default)]
pub struct WallClock {
    source: Source,
}

#[derive(Clone, Debug, Default)]
enum Source {
    #[default]
    System,
    Anchored {
        clock: Clock,
        /// A fixed point in time (TSC tick) to calculate deltas from.
        anchor: Instant,
        epoch: Duration,
    },
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock that reads `epoch` (time since the Unix epoch) right now.
    pub fn with_clock(clock: Clock, epoch: Duration) -> Self {
        let anchor = clock.now();
        Self {
            source: Source::Anchored {
                clock,
                anchor,
                epoch,
            },
        }
    }

    pub fn now(&self) -> Duration {
        match &self.source {
            // A clock set before 1970 reads as the epoch itself
            Source::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            Source::Anchored {
                clock,
                anchor,
                epoch,
            } => *epoch + clock.now().duration_since(*anchor),
        }
    }

    pub fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }
}
