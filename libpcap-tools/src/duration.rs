use serde::Serialize;
use std::ops::Sub;

/// Reimplementation of std::time::Duration, but panic-free
/// and partial, only to match our needs:
///   - use micros instead of nanos, avoid casts
///   - expose fields
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize)]
pub struct Duration {
    pub secs: u32,
    pub micros: u32,
}

pub const MICROS_PER_SEC: u32 = 1_000_000;

impl Duration {
    /// Build Duration from secs and micros
    pub const fn new(secs: u32, micros: u32) -> Duration {
        Duration { secs, micros }
    }

    #[inline]
    pub fn as_micros(self) -> u64 {
        u64::from(self.secs) * u64::from(MICROS_PER_SEC) + u64::from(self.micros)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.as_micros() as f64 / f64::from(MICROS_PER_SEC)
    }

    /// Difference `self - earlier` in milliseconds, or 0 if `earlier` is later
    pub fn millis_since(self, earlier: Duration) -> f64 {
        self.as_micros().saturating_sub(earlier.as_micros()) as f64 / 1000.0
    }
}

impl Sub for Duration {
    type Output = Duration;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn sub(self, other: Duration) -> Self::Output {
        let secs = self.secs.wrapping_sub(other.secs);
        let (secs, micros) = if self.micros >= other.micros {
            (secs, self.micros - other.micros)
        } else {
            let diff = other.micros.wrapping_sub(self.micros);
            let secs_less = diff / MICROS_PER_SEC;
            let micros = MICROS_PER_SEC - diff;
            (secs.wrapping_sub(1 + secs_less), micros)
        };

        Duration { secs, micros }
    }
}

#[cfg(test)]
mod tests {
    use super::Duration;
    #[test]
    fn duration_sub() {
        let d1 = Duration::new(1234, 5678);
        let d2 = Duration::new(1234, 6789);
        let d = d2 - d1;
        assert_eq!(d.secs, 0);
        assert_eq!(d.micros, 1111);
    }

    #[test]
    fn duration_millis_since() {
        let d1 = Duration::new(10, 0);
        let d2 = Duration::new(10, 250_000);
        assert_eq!(d2.millis_since(d1), 250.0);
        assert_eq!(d1.millis_since(d2), 0.0);
        assert_eq!(Duration::new(12, 5).as_secs_f64(), 12.000005);
    }
}
