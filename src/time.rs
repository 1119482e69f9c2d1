//! Time-related types based on the stack's high-precision timestamps


use core::ops::Add;
use serde::{Serialize, Deserialize};


/// Represents an instant in time
///
/// You can get the current stack time by calling [`Stack::now`].
///
/// Uses the same microsecond resolution as the stack's high-precision
/// clock, widened to 64 bits so that long advertising periods can be scheduled.
///
/// [`Stack::now`]: ../stack/trait.Stack.html#tymethod.now
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant` from a raw microsecond timestamp
    pub const fn from_micros(value: u64) -> Self {
        Instant(value)
    }

    /// Returns the raw timestamp in microseconds
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Wrap-around of the raw value is handled like the stack's
    /// own time difference helper does.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use diradv::time::Instant;
    ///
    /// let instant_1 = Instant::from_micros(u64::MAX - 50);
    /// let instant_2 = Instant::from_micros(u64::MAX);
    /// let instant_3 = Instant::from_micros(49);
    ///
    /// // Works as expected, if the later timestamp is larger than the earlier
    /// // one.
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.as_micros(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the numerically
    /// // smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.as_micros(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Instant(self.0.wrapping_add(rhs.0))
    }
}


/// A duration between two instants in stack time
///
/// Internally counts microseconds, like [`Instant`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// A zero-length duration
    pub const ZERO: Duration = Duration(0);

    /// Creates an instance of `Duration` from a number of microseconds
    pub const fn from_micros(micros: u64) -> Self {
        Duration(micros)
    }

    /// Creates an instance of `Duration` from a number of milliseconds
    ///
    /// # Example
    ///
    /// ``` rust
    /// use diradv::time::Duration;
    ///
    /// assert_eq!(Duration::from_millis(2).as_micros(), 2000);
    /// assert_eq!(Duration::from_millis(1500).as_millis(), 1500);
    /// ```
    pub const fn from_millis(millis: u32) -> Self {
        // `millis` takes up at most 32 bits before it is cast to `u64`, so the
        // multiplication can't overflow.
        Duration(millis as u64 * 1000)
    }

    /// Returns the duration in microseconds
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Returns the duration in whole milliseconds, saturating at `u32::MAX`
    pub fn as_millis(&self) -> u32 {
        let millis = self.0 / 1000;
        if millis > u32::MAX as u64 {
            u32::MAX
        }
        else {
            millis as u32
        }
    }

    /// Returns the time left of `self` after `elapsed` has passed
    pub fn saturating_sub(self, elapsed: Duration) -> Duration {
        Duration(self.0.saturating_sub(elapsed.0))
    }
}
