use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;

/// Heartbeat scaled by a random factor in `[0.5, 1.5)`, so that many pollers
/// sharing a store do not wake up together.
pub(crate) fn jittered(heartbeat: Duration) -> Duration {
    let factor = rand::rng().random_range(0.5..1.5);
    heartbeat.mul_f64(factor)
}

/// Locks a short-held mutex, recovering the value if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_around_the_heartbeat() {
        let heartbeat = Duration::from_secs(10);
        for _ in 0..200 {
            let slept = jittered(heartbeat);
            assert!(slept >= Duration::from_secs(5));
            assert!(slept < Duration::from_secs(15));
        }
    }

    #[test]
    fn zero_heartbeat_has_no_jitter() {
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
