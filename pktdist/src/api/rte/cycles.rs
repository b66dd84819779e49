// Cycle counter API
// Monotonic timestamps standing in for rte_rdtsc / rte_get_timer_hz.

use std::sync::OnceLock;
use std::time::Instant;

static BASE: OnceLock<Instant> = OnceLock::new();

/// Current timestamp counter value, in ticks of [`timer_hz`].
#[inline]
pub fn rdtsc() -> u64 {
    BASE.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Ticks per second of [`rdtsc`].
#[inline]
pub const fn timer_hz() -> u64 {
    1_000_000_000
}

/// Busy-wait for roughly `cycles` ticks.
#[inline]
pub fn spin_cycles(cycles: u64) {
    let start = rdtsc();
    while rdtsc().wrapping_sub(start) < cycles {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rdtsc_monotonic() {
        let a = rdtsc();
        spin_cycles(1_000);
        let b = rdtsc();
        assert!(b - a >= 1_000);
    }
}
