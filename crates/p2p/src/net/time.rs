//! Time as the reactor and state machine see it: millisecond wall-clock
//! stamps handed down on every tick, and the pending-timeout set.
use std::time::{SystemTime, UNIX_EPOCH};

/// A wall-clock moment, milliseconds since the epoch.
///
/// The reactor stamps every tick with one of these; the state machine only
/// ever compares stamps it was handed, so a clock step shows up as one long
/// or short interval rather than a panic.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Ord, PartialOrd, Default)]
pub struct LocalTime {
    millis: u64,
}

impl LocalTime {
    /// The current system time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// Construct a local time from whole seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * 1000,
        }
    }

    /// Whole seconds since the epoch.
    pub const fn as_secs(&self) -> u64 {
        self.millis / 1000
    }

    /// Absolute difference between two times.
    pub fn diff(&self, other: LocalTime) -> LocalDuration {
        LocalDuration {
            millis: self.millis.abs_diff(other.millis),
        }
    }
}

impl std::fmt::Display for LocalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_secs())
    }
}

impl From<SystemTime> for LocalTime {
    fn from(system: SystemTime) -> Self {
        let millis = system
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as u64;

        Self { millis }
    }
}

/// Time elapsed since an earlier stamp. Saturates at zero if the clock
/// stepped backwards between the two.
impl std::ops::Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, earlier: LocalTime) -> LocalDuration {
        LocalDuration {
            millis: self.millis.saturating_sub(earlier.millis),
        }
    }
}

impl std::ops::Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, duration: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis + duration.millis,
        }
    }
}

/// A span of local time, milliseconds.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Default)]
pub struct LocalDuration {
    millis: u64,
}

impl LocalDuration {
    /// A duration of whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * 1000,
        }
    }

    /// A duration of whole minutes.
    pub const fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins * 60)
    }

    /// A duration of milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Whole seconds in this duration.
    pub const fn as_secs(&self) -> u64 {
        self.millis / 1000
    }

    /// Milliseconds in this duration.
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Bound the duration between two limits.
    pub fn clamp(self, min: LocalDuration, max: LocalDuration) -> LocalDuration {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }
}

impl std::fmt::Display for LocalDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.millis < 1000 {
            write!(f, "{} millisecond(s)", self.millis)
        } else if self.as_secs() < 60 {
            write!(f, "{} second(s)", self.as_secs())
        } else {
            write!(f, "{} minute(s)", self.as_secs() / 60)
        }
    }
}

impl From<LocalDuration> for std::time::Duration {
    fn from(duration: LocalDuration) -> Self {
        std::time::Duration::from_millis(duration.millis)
    }
}

/// The reactor's pending wakeups.
///
/// The state machine asks for wakeups with [`crate::net::Io::SetTimer`]; the
/// reactor doesn't care *which* deadline fired, only that one did, so this
/// stores bare deadlines and coalesces those that land close together.
pub struct Timeouts {
    /// Pending deadlines, soonest last.
    deadlines: Vec<LocalTime>,
    /// Two deadlines closer than this collapse into one.
    threshold: LocalDuration,
}

impl Timeouts {
    pub fn new(threshold: LocalDuration) -> Self {
        Self {
            deadlines: Vec::new(),
            threshold,
        }
    }

    /// Number of pending deadlines.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Register a wakeup. Returns `false` if an existing deadline already
    /// covers this one.
    pub fn register(&mut self, deadline: LocalTime) -> bool {
        if self
            .deadlines
            .iter()
            .any(|existing| existing.diff(deadline) < self.threshold)
        {
            return false;
        }

        self.deadlines.push(deadline);
        self.deadlines.sort_unstable_by(|a, b| b.cmp(a));

        true
    }

    /// Drop every deadline at or before `now`; returns how many fired.
    pub fn wake(&mut self, now: LocalTime) -> usize {
        let mut fired = 0;

        while let Some(deadline) = self.deadlines.last() {
            if *deadline > now {
                break;
            }
            self.deadlines.pop();
            fired += 1;
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_due_deadlines_fire() {
        let mut timeouts = Timeouts::new(LocalDuration::from_millis(0));
        let start = LocalTime::from_secs(100);

        timeouts.register(start + LocalDuration::from_secs(1));
        timeouts.register(start + LocalDuration::from_secs(3));

        assert_eq!(timeouts.wake(start + LocalDuration::from_secs(2)), 1);
        assert_eq!(timeouts.len(), 1);
    }

    #[test]
    fn close_deadlines_are_coalesced() {
        let mut timeouts = Timeouts::new(LocalDuration::from_secs(1));
        let start = LocalTime::from_secs(100);

        assert!(timeouts.register(start + LocalDuration::from_secs(10)));
        assert!(!timeouts.register(start + LocalDuration::from_millis(10_500)));
        assert_eq!(timeouts.len(), 1);
    }

    #[test]
    fn backwards_clock_saturates_to_zero() {
        let earlier = LocalTime::from_secs(100);
        let later = LocalTime::from_secs(200);

        assert_eq!(earlier - later, LocalDuration::from_secs(0));
        assert_eq!(later.diff(earlier), LocalDuration::from_secs(100));
    }
}
