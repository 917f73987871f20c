//! Fixed-size per-frame histories.

use framestat_core::constants::STAT_HISTORY_SIZE;

/// A value that can be stored in a [`StatHistory`].
pub trait HistoryValue: Copy + Default + PartialOrd {
    /// Widens the value for the running sum and peak.
    fn to_f64(self) -> f64;
}

impl HistoryValue for u32 {
    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl HistoryValue for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl HistoryValue for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

/// Ring of the last `N` frame values with a running sum and peak.
///
/// The ring is written at `count % N`. The running sum subtracts the value
/// being overwritten and adds the new one, so it always equals the sum of the
/// stored slots. The peak is reset every time the ring wraps.
#[derive(Debug, Clone)]
pub struct StatHistory<T: HistoryValue, const N: usize = STAT_HISTORY_SIZE> {
    values: [T; N],
    count: u32,
    total: f64,
    peak: f64,
}

impl<T: HistoryValue, const N: usize> Default for StatHistory<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: HistoryValue, const N: usize> StatHistory<T, N> {
    /// Create a zeroed history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: [T::default(); N],
            count: 0,
            total: 0.0,
            peak: 0.0,
        }
    }

    /// Record the value for a new frame.
    pub fn add(&mut self, value: T) {
        let index = (self.count as usize) % N;
        self.count = self.count.wrapping_add(1);
        if index == 0 {
            self.peak = T::default().to_f64();
        }
        self.total = self.total - self.values[index].to_f64() + value.to_f64();
        self.values[index] = value;
        if value.to_f64() > self.peak {
            self.peak = value.to_f64();
        }
    }

    /// Running sum divided by the ring size.
    #[inline]
    #[must_use]
    pub fn average(&self) -> f64 {
        self.total / N as f64
    }

    /// Largest value since the ring last wrapped.
    #[inline]
    #[must_use]
    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Value of the last recorded frame, zero before the first one.
    #[inline]
    #[must_use]
    pub fn most_recent(&self) -> T {
        if self.count == 0 {
            return T::default();
        }
        self.values[((self.count - 1) as usize) % N]
    }

    /// Running sum of the stored values.
    #[inline]
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of frames recorded so far.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Ring capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The raw ring slots, in slot order (not frame order).
    #[must_use]
    pub fn slots(&self) -> &[T] {
        &self.values
    }
}

/// Frame rate tracker fed from wall time, independent of the stats it
/// measures so the stats overhead itself can be sanity checked.
#[derive(Debug, Clone, Default)]
pub struct FpsCounter {
    history: StatHistory<f64>,
    last_time: Option<f64>,
    delta_time: f64,
}

impl FpsCounter {
    /// Create a counter that has seen no frames.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the time of a frame boundary, in seconds.
    ///
    /// The first call only establishes the reference time.
    pub fn update(&mut self, now: f64) {
        self.delta_time = self.last_time.map_or(0.0, |last| now - last);
        self.last_time = Some(now);
        self.history.add(self.delta_time);
    }

    /// Duration of the last complete frame in seconds.
    #[must_use]
    pub fn frame_time(&self) -> f64 {
        self.delta_time
    }

    /// Average frames per second over the history window.
    #[must_use]
    pub fn average_fps(&self) -> f64 {
        let average = self.history.average();
        if average > 0.0 {
            1.0 / average
        } else {
            0.0
        }
    }

    /// Underlying delta-time history.
    #[must_use]
    pub fn history(&self) -> &StatHistory<f64> {
        &self.history
    }
}
