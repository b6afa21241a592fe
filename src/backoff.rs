//! Adapted from the crossbeam-utils backoff.
use std::cell::Cell;
use std::hint;
use std::thread;

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;

/// Performs exponential backoff in spin loops.
///
/// Each step of the back off procedure takes roughly twice as long as the
/// previous step. Used both while acquiring a record latch and while a
/// parked transaction polls its ready flag.
#[derive(Debug)]
pub struct Backoff {
    step: Cell<u32>,
}

impl Default for Backoff {
    fn default() -> Backoff {
        Backoff::new()
    }
}

impl Backoff {
    /// Creates a new `Backoff`.
    pub const fn new() -> Self {
        Backoff { step: Cell::new(0) }
    }

    /// Backs off while another thread holds a short critical section.
    ///
    /// Only executes *PAUSE* / *YIELD* instructions, never yields the thread
    /// to the OS scheduler.
    #[inline]
    pub fn spin(&self) {
        for _ in 0..1 << self.step.get().min(SPIN_LIMIT) {
            hint::spin_loop();
        }

        if self.step.get() <= SPIN_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }

    /// Backs off while waiting on another thread to make progress that may
    /// take arbitrarily long, such as a wake cascade triggered by a commit.
    ///
    /// Spins for a few steps and then starts yielding to the scheduler.
    #[inline]
    pub fn snooze(&self) {
        if self.step.get() <= SPIN_LIMIT {
            for _ in 0..1 << self.step.get() {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }

        if self.step.get() <= YIELD_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }
}

#[test]
fn backoff_steps_saturate() {
    let spinner = Backoff::new();
    for _ in 0..100 {
        spinner.spin();
    }
    assert_eq!(spinner.step.get(), SPIN_LIMIT + 1);

    let snoozer = Backoff::new();
    for _ in 0..100 {
        snoozer.snooze();
    }
    assert_eq!(snoozer.step.get(), YIELD_LIMIT + 1);
}
