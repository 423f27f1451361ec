//! Bounded per-port packet queue
//!
//! `push` never blocks the receive task. When the queue is full, every
//! buffered packet is discarded and the new one takes its place.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::stats::IngestCounters;

pub struct PacketQueue {
    port_offset: usize,
    capacity: usize,
    packets: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
    closed: AtomicBool,
    counters: Arc<IngestCounters>,
}

impl PacketQueue {
    /// Create a queue for the port at `port_offset` from the range start
    pub fn new(port_offset: usize, capacity: usize, counters: Arc<IngestCounters>) -> Self {
        let capacity = capacity.max(1);
        Self {
            port_offset,
            capacity,
            packets: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            counters,
        }
    }

    pub fn port_offset(&self) -> usize {
        self.port_offset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    /// Enqueue a packet without waiting
    ///
    /// On a full queue the backlog is flushed, the packet is enqueued and
    /// [`QueueError::Overflow`] reports how many packets were lost. The
    /// packet itself is always accepted unless the queue is closed.
    pub fn push(&self, packet: Vec<u8>) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed {
                port_offset: self.port_offset,
            });
        }

        let overflow = {
            let mut packets = self.packets.lock();
            let dropped = if packets.len() >= self.capacity {
                let dropped = packets.len();
                packets.clear();
                self.counters.queue_resets.increment();
                Some(dropped)
            } else {
                None
            };
            packets.push_back(packet);
            dropped
        };

        self.ready.notify_one();

        match overflow {
            Some(dropped) => Err(QueueError::Overflow {
                port_offset: self.port_offset,
                dropped,
            }),
            None => Ok(()),
        }
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        self.packets.lock().pop_front()
    }

    /// Wait for the next packet
    ///
    /// Returns `None` once the queue is closed and everything buffered
    /// before the close has been handed out.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            if let Some(packet) = self.try_pop() {
                return Some(packet);
            }
            if self.closed.load(Ordering::SeqCst) {
                // A push may have landed between the pop and the flag check.
                return self.try_pop();
            }
            self.ready.notified().await;
        }
    }

    /// Stop accepting packets and wake the consumer so it can drain and exit
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_one();
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue {port_offset} reset, {dropped} buffered packets dropped")]
    Overflow { port_offset: usize, dropped: usize },

    #[error("queue {port_offset} is closed")]
    Closed { port_offset: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn queue(capacity: usize) -> (PacketQueue, Arc<IngestCounters>) {
        let counters = Arc::new(IngestCounters::new());
        (PacketQueue::new(0, capacity, Arc::clone(&counters)), counters)
    }

    fn packet(n: u8) -> Vec<u8> {
        vec![n]
    }

    #[tokio::test]
    async fn test_push_and_pop_in_order() {
        let (queue, counters) = queue(4);

        for n in 0..4 {
            queue.push(packet(n)).unwrap();
        }
        assert_eq!(queue.len(), 4);

        for n in 0..4 {
            assert_eq!(queue.pop().await, Some(packet(n)));
        }
        assert!(queue.is_empty());
        assert_eq!(counters.queue_resets.count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_flushes_backlog() {
        let (queue, counters) = queue(3);

        for n in 0..3 {
            queue.push(packet(n)).unwrap();
        }
        let err = queue.push(packet(3)).unwrap_err();
        assert_eq!(
            err,
            QueueError::Overflow {
                port_offset: 0,
                dropped: 3
            }
        );

        // Only the packet that triggered the reset survives
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().await, Some(packet(3)));
        assert_eq!(counters.queue_resets.count(), 1);
    }

    #[tokio::test]
    async fn test_one_reset_per_overflow() {
        let (queue, counters) = queue(2);

        // 2 fit, the 3rd resets, 4th fits, 5th resets, 6th fits
        let results: Vec<_> = (0..6).map(|n| queue.push(packet(n)).is_ok()).collect();
        assert_eq!(results, vec![true, true, false, true, false, true]);
        assert_eq!(counters.queue_resets.count(), 2);

        assert_eq!(queue.pop().await, Some(packet(4)));
        assert_eq!(queue.pop().await, Some(packet(5)));
    }

    #[test]
    fn test_zero_capacity_holds_one_packet() {
        let (queue, _) = queue(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(packet(1)).unwrap();
        assert!(queue.push(packet(2)).is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_waits_for_push() {
        let (queue, _) = queue(4);

        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.push(packet(7)).unwrap();
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), Some(packet(7)));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (queue, _) = queue(4);

        queue.push(packet(1)).unwrap();
        queue.push(packet(2)).unwrap();
        queue.close();

        assert_eq!(
            queue.push(packet(3)),
            Err(QueueError::Closed { port_offset: 0 })
        );
        assert_eq!(queue.pop().await, Some(packet(1)));
        assert_eq!(queue.pop().await, Some(packet(2)));
        assert_eq!(queue.pop().await, None);
    }

    #[test]
    fn test_close_wakes_waiting_consumer() {
        let (queue, _) = queue(4);

        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.close();
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), None);
    }
}
