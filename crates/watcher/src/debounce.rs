//! Rolling batch worker
//!
//! Collects units of work and hands them out as one batch once a fixed delay
//! after the first unit has passed. The delay is not reset by later units, so
//! a steady stream of events is still flushed at a steady pace.
//!
//! The worker does not own a timer. `work` tells the caller when a flush must
//! be scheduled, the caller calls `take` once the delay elapsed.

use std::mem;
use std::time::Duration;

/// Batch accumulator with a fixed flush delay
#[derive(Debug)]
pub struct BatchWorker<T> {
    units: Vec<T>,
    scheduled: bool,
    delay: Duration,
    disposed: bool,
}

impl<T> BatchWorker<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            units: Vec::new(),
            scheduled: false,
            delay,
            disposed: false,
        }
    }

    /// Queue a unit
    ///
    /// Returns true when this unit opened a new batch and the caller has to
    /// schedule a flush after [`BatchWorker::delay`].
    pub fn work(&mut self, unit: T) -> bool {
        if self.disposed {
            return false;
        }
        self.units.push(unit);
        if self.scheduled {
            false
        } else {
            self.scheduled = true;
            true
        }
    }

    /// Take the current batch and start a new one
    pub fn take(&mut self) -> Vec<T> {
        self.scheduled = false;
        mem::take(&mut self.units)
    }

    /// Drop pending units and refuse further work
    pub fn dispose(&mut self) {
        self.units.clear();
        self.scheduled = false;
        self.disposed = true;
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn pending(&self) -> usize {
        self.units.len()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_unit_schedules_flush() {
        let mut worker = BatchWorker::new(Duration::from_millis(75));

        assert!(worker.work(1));
        assert!(!worker.work(2));
        assert!(worker.is_scheduled());
        assert_eq!(worker.pending(), 2);

        assert_eq!(worker.take(), vec![1, 2]);
        assert!(!worker.is_scheduled());

        // Next unit opens a new batch
        assert!(worker.work(3));
    }

    #[test]
    fn test_disposed_worker_refuses_work() {
        let mut worker = BatchWorker::new(Duration::from_millis(75));
        worker.work(1);
        worker.dispose();

        assert!(!worker.work(2));
        assert!(worker.take().is_empty());
    }
}
