#[cfg(test)]
pub(crate) mod tests;

use std::fmt;
use std::time::Instant;

/// Wall-clock timer, displayed as the elapsed time in seconds.
pub struct Timer {
    pub(crate) time: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer {
            time: Instant::now(),
        }
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:>68} {:>8.2} s",
            "elapsed time:",
            self.time.elapsed().as_secs_f32()
        )
    }
}
