//! Phase timing helpers

use std::time::{Duration, Instant};

/// Render a duration using its two most significant non-zero units
///
/// Hours are the largest unit; anything past a day wraps, matching the
/// operator reports this replaces.
pub fn format_elapsed(elapsed: Duration) -> String {
    let micros = elapsed.as_micros();

    let microseconds = micros % 1_000;
    let milliseconds = (micros / 1_000) % 1_000;
    let seconds = (micros / 1_000_000) % 60;
    let minutes = (micros / 60_000_000) % 60;
    let hours = (micros / 3_600_000_000) % 24;

    if hours != 0 {
        format!("{hours} hours {minutes} min {seconds} sec")
    } else if minutes != 0 {
        format!("{minutes} min {seconds} sec")
    } else if seconds != 0 {
        format!("{seconds} sec {milliseconds} ms")
    } else {
        format!("{milliseconds} ms {microseconds} µs")
    }
}

/// Wall-clock stopwatch for a single phase
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_human(&self) -> String {
        format_elapsed(self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_second_uses_ms_and_us() {
        assert_eq!(format_elapsed(Duration::from_micros(12_345)), "12 ms 345 µs");
        assert_eq!(format_elapsed(Duration::ZERO), "0 ms 0 µs");
    }

    #[test]
    fn test_seconds_use_sec_and_ms() {
        assert_eq!(format_elapsed(Duration::from_millis(3_250)), "3 sec 250 ms");
    }

    #[test]
    fn test_minutes_drop_milliseconds() {
        assert_eq!(format_elapsed(Duration::from_millis(125_900)), "2 min 5 sec");
    }

    #[test]
    fn test_hours_keep_three_units() {
        let elapsed = Duration::from_secs(2 * 3_600 + 7 * 60 + 9);
        assert_eq!(format_elapsed(elapsed), "2 hours 7 min 9 sec");
    }

    #[test]
    fn test_stopwatch_is_monotonic() {
        let watch = Stopwatch::start();
        let first = watch.elapsed();
        assert!(watch.elapsed() >= first);
    }
}
