//! Throttled delivery of events to the downstream consumer
//!
//! Bounds:
//! - at most `max_chunk_size` units are handed over per turn
//! - after a turn with leftovers, the emitter rests for `delay`
//! - never more than `max_buffered` units wait in memory; a batch that would
//!   exceed the bound is rejected as a whole
//!
//! Like [`crate::debounce::BatchWorker`], the emitter does not own a timer:
//! when it needs to rest it returns the cooldown and expects [`ThrottledEmitter::resume`]
//! to be called once it elapsed.

use crate::config::ThrottleConfig;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Outcome of handing a batch to the emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkResult {
    /// Whether the batch was accepted
    pub accepted: bool,
    /// A cooldown the caller has to schedule before calling `resume`
    pub cooldown: Option<Duration>,
}

/// Rate-limited forwarder
pub struct ThrottledEmitter<T> {
    options: ThrottleConfig,
    pending: VecDeque<T>,
    throttling: bool,
    disposed: bool,
    handler: Box<dyn FnMut(Vec<T>) + Send>,
}

impl<T> fmt::Debug for ThrottledEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledEmitter")
            .field("options", &self.options)
            .field("pending", &self.pending.len())
            .field("throttling", &self.throttling)
            .finish()
    }
}

impl<T> ThrottledEmitter<T> {
    pub fn new(options: ThrottleConfig, handler: impl FnMut(Vec<T>) + Send + 'static) -> Self {
        Self {
            options,
            pending: VecDeque::new(),
            throttling: false,
            disposed: false,
            handler: Box::new(handler),
        }
    }

    /// Units accepted but not yet handed over
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_throttling(&self) -> bool {
        self.throttling
    }

    /// Hand over a batch of units
    pub fn work(&mut self, units: Vec<T>) -> WorkResult {
        if self.disposed {
            return WorkResult {
                accepted: false,
                cooldown: None,
            };
        }

        // While resting everything goes to the buffer; otherwise the first
        // chunk is delivered right away and never buffered
        let buffered = if self.throttling {
            self.pending.len() + units.len()
        } else {
            (self.pending.len() + units.len()).saturating_sub(self.options.max_chunk_size)
        };
        if buffered > self.options.max_buffered {
            return WorkResult {
                accepted: false,
                cooldown: None,
            };
        }

        self.pending.extend(units);

        let cooldown = if self.throttling { None } else { self.do_work() };

        WorkResult {
            accepted: true,
            cooldown,
        }
    }

    /// Continue after a cooldown elapsed
    ///
    /// Returns the next cooldown if units are still pending.
    pub fn resume(&mut self) -> Option<Duration> {
        self.throttling = false;
        if self.disposed || self.pending.is_empty() {
            return None;
        }
        self.do_work()
    }

    fn do_work(&mut self) -> Option<Duration> {
        let chunk_size = self.options.max_chunk_size.min(self.pending.len());
        let chunk: Vec<T> = self.pending.drain(..chunk_size).collect();
        (self.handler)(chunk);

        if self.pending.is_empty() {
            None
        } else {
            self.throttling = true;
            Some(self.options.delay())
        }
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn emitter(chunk: usize, buffered: usize) -> (ThrottledEmitter<u32>, Arc<Mutex<Vec<Vec<u32>>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let emitter = ThrottledEmitter::new(
            ThrottleConfig {
                max_chunk_size: chunk,
                delay_ms: 200,
                max_buffered: buffered,
            },
            move |units| sink.lock().push(units),
        );
        (emitter, delivered)
    }

    #[test]
    fn test_small_batch_delivered_immediately() {
        let (mut emitter, delivered) = emitter(5, 10);

        let result = emitter.work(vec![1, 2, 3]);
        assert!(result.accepted);
        assert_eq!(result.cooldown, None);
        assert_eq!(*delivered.lock(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_large_batch_chunked_with_cooldown() {
        let (mut emitter, delivered) = emitter(2, 10);

        let result = emitter.work(vec![1, 2, 3, 4, 5]);
        assert!(result.accepted);
        assert_eq!(result.cooldown, Some(Duration::from_millis(200)));
        assert_eq!(emitter.pending(), 3);

        // Queued while resting
        let result = emitter.work(vec![6]);
        assert!(result.accepted);
        assert_eq!(result.cooldown, None);
        assert_eq!(emitter.pending(), 4);

        // [3, 4] leaves [5, 6] for one more turn, which drains the buffer
        assert!(emitter.resume().is_some());
        assert!(emitter.resume().is_none());

        assert_eq!(
            *delivered.lock(),
            vec![vec![1, 2], vec![3, 4], vec![5, 6]]
        );
        assert!(!emitter.is_throttling());
    }

    #[test]
    fn test_oversized_batch_rejected_whole() {
        let (mut emitter, delivered) = emitter(2, 5);

        // 8 - 2 delivered directly = 6 buffered > 5
        let result = emitter.work((0..8).collect());
        assert!(!result.accepted);
        assert_eq!(emitter.pending(), 0);
        assert!(delivered.lock().is_empty());

        // 7 - 2 = 5 fits
        assert!(emitter.work((0..7).collect()).accepted);
    }

    #[test]
    fn test_rejects_when_buffer_full_while_resting() {
        let (mut emitter, _delivered) = emitter(2, 5);

        assert!(emitter.work((0..7).collect()).accepted);
        assert_eq!(emitter.pending(), 5);
        assert!(!emitter.work(vec![99]).accepted);
        assert_eq!(emitter.pending(), 5);
    }

    #[test]
    fn test_disposed_emitter_rejects() {
        let (mut emitter, _delivered) = emitter(2, 5);
        emitter.dispose();
        assert!(!emitter.work(vec![1]).accepted);
    }
}
