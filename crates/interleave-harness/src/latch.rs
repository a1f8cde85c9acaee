//! Countdown shared by the steps of one batch.

use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Single-use countdown latch.
///
/// Each step of a batch counts down once, when its worker reaches the target
/// checkpoint or stops running. The controller waits for zero. Counting down
/// past zero is ignored.
#[derive(Debug)]
pub(crate) struct Countdown {
    /// Outstanding count.
    remaining: Mutex<usize>,
    /// Wakes waiters when the count reaches zero.
    condvar: Condvar,
}

impl Countdown {
    pub(crate) fn new(count: usize) -> Self {
        Self { remaining: Mutex::new(count), condvar: Condvar::new() }
    }

    pub(crate) fn count_down(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *remaining == 0 {
            return;
        }

        *remaining -= 1;
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    /// Wait for the count to reach zero. Returns `false` on timeout.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        let (remaining, _) = self
            .condvar
            .wait_timeout_while(remaining, timeout, |remaining| *remaining > 0)
            .unwrap_or_else(PoisonError::into_inner);

        *remaining == 0
    }

    pub(crate) fn remaining(&self) -> usize {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn zero_count_is_already_open() {
        assert!(Countdown::new(0).wait(Duration::from_millis(1)));
    }

    #[test]
    fn opens_after_every_count_down() {
        let latch = Arc::new(Countdown::new(3));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.count_down())
            })
            .collect();

        assert!(latch.wait(Duration::from_secs(5)));
        assert_eq!(latch.remaining(), 0);

        for handle in handles {
            handle.join().expect("counter panicked");
        }
    }

    #[test]
    fn times_out_while_outstanding() {
        let latch = Countdown::new(2);
        latch.count_down();
        assert!(!latch.wait(Duration::from_millis(20)));
        assert_eq!(latch.remaining(), 1);
    }

    #[test]
    fn extra_count_down_saturates() {
        let latch = Countdown::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.remaining(), 0);
        assert!(latch.wait(Duration::from_millis(1)));
    }
}
