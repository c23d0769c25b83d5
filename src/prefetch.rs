//! The generic prefetch/recycle machinery (§4.4 of the spec), reused for
//! both the inner chunk-level prefetch and the outer batch-level prefetch
//! named in §4.5 — mirroring how `dmlc::ThreadedIter<T>` is a single
//! generic template in the original source, reused the same way.
//!
//! Grounded in the bounded-channel-plus-background-thread shape used
//! throughout `examples/kassoulet-bz2zstd` (`scan_blocks`,
//! `Bz2Decoder::new`, and `src/main.rs`'s writer thread all hand results
//! between a producer and a consumer over a `crossbeam_channel::bounded`
//! queue). Unlike that teacher code, this prefetcher never needs to
//! reorder: one producer thread calls `parse_next` sequentially, so
//! output already arrives in source order.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{Error, Result};

/// Default prefetch depth: at most `K = 4` parsed slots in flight (§4.4,
/// §8 invariant 8).
pub const DEFAULT_CAPACITY: usize = 4;

enum ToProducer<T> {
    Recycle(T),
    Stop,
}

enum FromProducer<T> {
    Slot(T),
    Done,
    Failed(Error),
}

/// A bounded, slot-recycling producer/consumer prefetch queue.
///
/// `produce` is called on a background thread with a recycled slot
/// (initially `T::default()`-equivalent, built once per slot by
/// `make_slot`) and must either fill it and return `Ok(Some(slot))`, or
/// return `Ok(None)` at end of stream, or `Err` on a fatal error.
pub struct Prefetcher<T: Send + 'static> {
    to_producer: Sender<ToProducer<T>>,
    from_producer: Receiver<FromProducer<T>>,
    handle: Option<std::thread::JoinHandle<()>>,
    capacity: usize,
}

impl<T: Send + 'static> Prefetcher<T> {
    /// Spawns the background producer. `make_slot` builds an empty slot
    /// for the initial free pool; `produce` is the per-call work (e.g.
    /// `Parser::parse_next`), given ownership of a recycled slot.
    pub fn new<F, P>(capacity: usize, make_slot: F, mut produce: P) -> Self
    where
        F: Fn() -> T,
        P: FnMut(T) -> Result<Option<T>> + Send + 'static,
    {
        let capacity = capacity.max(1);
        let (to_producer, producer_rx) = bounded::<ToProducer<T>>(capacity);
        let (producer_tx, from_producer) = bounded::<FromProducer<T>>(capacity);

        // Pre-populate the free pool so the producer never waits on the
        // consumer just to get its first slot.
        for _ in 0..capacity {
            let _ = to_producer.send(ToProducer::Recycle(make_slot()));
        }

        let handle = std::thread::spawn(move || {
            for msg in producer_rx {
                let slot = match msg {
                    ToProducer::Recycle(slot) => slot,
                    ToProducer::Stop => break,
                };
                match produce(slot) {
                    Ok(Some(filled)) => {
                        if producer_tx.send(FromProducer::Slot(filled)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = producer_tx.send(FromProducer::Done);
                    }
                    Err(e) => {
                        let _ = producer_tx.send(FromProducer::Failed(e));
                    }
                }
            }
        });

        Prefetcher {
            to_producer,
            from_producer,
            handle: Some(handle),
            capacity,
        }
    }

    /// Blocks until a filled slot is available, end-of-stream, or a fatal
    /// error. Hands over ownership of the slot to the caller.
    pub fn next(&mut self) -> Result<Option<T>> {
        match self.from_producer.recv() {
            Ok(FromProducer::Slot(slot)) => Ok(Some(slot)),
            Ok(FromProducer::Done) => Ok(None),
            Ok(FromProducer::Failed(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Returns a drained slot to the producer's free pool.
    pub fn recycle(&mut self, slot: T) {
        let _ = self.to_producer.send(ToProducer::Recycle(slot));
    }

    /// Stops the producer, drains the queue, runs `rewind` (expected to
    /// reset the underlying source), then restarts production with a
    /// fresh `produce` closure. `rewind` runs strictly after the old
    /// producer thread has been joined and strictly before the new one
    /// starts, so a rewind can never race with an in-flight `produce`
    /// call from the old generation.
    pub fn before_first<R, F, P>(&mut self, rewind: R, make_slot: F, produce: P)
    where
        R: FnOnce(),
        F: Fn() -> T,
        P: FnMut(T) -> Result<Option<T>> + Send + 'static,
    {
        let _ = self.to_producer.send(ToProducer::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        // Drain whatever the producer already queued before it stopped.
        while self.from_producer.try_recv().is_ok() {}

        rewind();

        *self = Prefetcher::new(self.capacity, make_slot, produce);
    }
}

impl<T: Send + 'static> Drop for Prefetcher<T> {
    fn drop(&mut self) {
        let _ = self.to_producer.send(ToProducer::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn delivers_slots_in_order_then_signals_end() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();

        let mut prefetch = Prefetcher::new(
            2,
            || 0usize,
            move |_slot| {
                let n = counter2.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Ok(Some(n))
                } else {
                    Ok(None)
                }
            },
        );

        let mut seen = Vec::new();
        while let Some(slot) = prefetch.next().unwrap() {
            seen.push(slot);
            prefetch.recycle(0);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn propagates_producer_errors() {
        let mut prefetch: Prefetcher<usize> = Prefetcher::new(
            1,
            || 0usize,
            |_slot| Err(Error::Format("boom".to_string())),
        );
        assert!(prefetch.next().is_err());
    }

    #[test]
    fn before_first_restarts_the_stream() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();

        let mut prefetch = Prefetcher::new(
            2,
            || 0usize,
            move |_slot| {
                let n = counter2.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Ok(Some(n))
                } else {
                    Ok(None)
                }
            },
        );
        assert_eq!(prefetch.next().unwrap(), Some(0));

        let counter3 = counter.clone();
        counter.store(0, Ordering::SeqCst);
        prefetch.before_first(
            || {},
            || 0usize,
            move |_slot| {
                let n = counter3.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Ok(Some(100 + n))
                } else {
                    Ok(None)
                }
            },
        );
        assert_eq!(prefetch.next().unwrap(), Some(100));
    }
}
