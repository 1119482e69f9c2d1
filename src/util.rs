//! Contains utility functions that are useful when running the protocol


use embedded_hal::blocking::rng;
use log::warn;


/// Source of random delays
///
/// Spreads the activity of many nodes over time so that they don't all scan
/// and send at the same instant. Wraps any random number generator that
/// implements `embedded_hal::blocking::rng::Read`, like the nRF52's RNG
/// peripheral.
#[derive(Debug)]
pub struct Jitter<R> {
    rng: R,
}

impl<R> Jitter<R>
    where R: rng::Read
{
    /// Create a new instance of `Jitter`
    pub fn new(rng: R) -> Self {
        Jitter { rng }
    }

    /// Returns a random number of milliseconds in `[0, max_ms)`
    ///
    /// Returns 0 if `max_ms` is 0, or if the random number generator fails.
    pub fn jitter_ms(&mut self, max_ms: u32) -> u32 {
        if max_ms == 0 {
            return 0;
        }

        let mut buf = [0; 4];
        match self.rng.read(&mut buf) {
            Ok(()) => u32::from_le_bytes(buf) % max_ms,
            Err(_) => {
                warn!("random number generator failed, no jitter applied");
                0
            }
        }
    }

    /// Releases the random number generator
    pub fn free(self) -> R {
        self.rng
    }
}
