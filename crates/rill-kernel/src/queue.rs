//! Bounded packet queue with blocking backpressure.
//!
//! [`PacketQueue`] is the FIFO inside every connection. It is built from a
//! mutex-guarded `VecDeque`, a [`Semaphore`] whose permits are the free
//! slots, and a [`Notify`] that wakes the receiver:
//!
//! - `send` acquires a slot permit, suspending the caller while the queue is
//!   at capacity; the permit is forgotten and handed back by `recv`.
//! - `recv` registers for notification *before* checking the queue, so a
//!   concurrent `send` can never slip a packet in unobserved.
//! - `close` closes the semaphore (waking blocked senders with an error) and
//!   notifies the receiver, which drains whatever is buffered and then
//!   observes `None`.
//!
//! Each queue has exactly one producer and one consumer; `close` relies on
//! that single-consumer discipline.

use crate::error::QueueClosed;
use crate::packet::Packet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{Notify, Semaphore};
use tracing::trace;

/// A bounded, closable FIFO of packets.
pub struct PacketQueue {
    queue: Mutex<VecDeque<Packet>>,
    slots: Semaphore,
    ready: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl PacketQueue {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0; a connection must be able to hold at least
    /// one packet.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "capacity must be >= 1");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a packet, suspending while the queue is at capacity.
    ///
    /// Fails with [`QueueClosed`] if the queue has been closed, including
    /// while the caller was suspended waiting for a free slot.
    pub async fn send(&self, packet: Packet) -> Result<(), QueueClosed> {
        let permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(QueueClosed),
        };
        // The receiver hands the permit back when it dequeues.
        permit.forget();

        if self.is_closed() {
            return Err(QueueClosed);
        }

        self.queue.lock().unwrap().push_back(packet);
        self.ready.notify_one();
        Ok(())
    }

    /// Dequeue the next packet, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained; every
    /// buffered packet is still delivered, in order, before that.
    pub async fn recv(&self) -> Option<Packet> {
        loop {
            // Register before checking the queue to avoid missed wakeups.
            let notified = self.ready.notified();

            if let Some(packet) = self.queue.lock().unwrap().pop_front() {
                if !self.is_closed() {
                    self.slots.add_permits(1);
                }
                return Some(packet);
            }

            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    /// Non-blocking poll; `None` when nothing is buffered.
    pub fn try_recv(&self) -> Option<Packet> {
        let packet = self.queue.lock().unwrap().pop_front();
        if packet.is_some() && !self.is_closed() {
            self.slots.add_permits(1);
        }
        packet
    }

    /// Close the queue. Idempotent.
    ///
    /// Blocked senders fail with [`QueueClosed`]; the receiver drains the
    /// remaining packets and then observes `None`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!(buffered = self.len(), "queue closed");
            self.slots.close();
            self.ready.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PacketQueue;
    use crate::packet::Packet;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn data(v: i64) -> Packet {
        Packet::data(json!(v))
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let q = PacketQueue::new(8);
        for i in 0..5 {
            q.send(data(i)).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.recv().await, Some(data(i)));
        }
    }

    #[tokio::test]
    async fn send_blocks_at_capacity_until_a_recv() {
        let q = Arc::new(PacketQueue::new(1));
        q.send(data(0)).await.unwrap();

        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.send(data(1)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished(), "send should be suspended on a full queue");
        assert_eq!(q.len(), 1);

        assert_eq!(q.recv().await, Some(data(0)));
        blocked.await.unwrap().unwrap();
        assert_eq!(q.recv().await, Some(data(1)));
    }

    #[tokio::test]
    async fn recv_blocks_until_a_send() {
        let q = Arc::new(PacketQueue::new(1));
        let q2 = q.clone();
        let receiver = tokio::spawn(async move { q2.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!receiver.is_finished(), "recv should be suspended on an empty queue");

        q.send(data(7)).await.unwrap();
        assert_eq!(receiver.await.unwrap(), Some(data(7)));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q = PacketQueue::new(4);
        q.send(data(1)).await.unwrap();
        q.send(data(2)).await.unwrap();
        q.close();

        assert_eq!(q.recv().await, Some(data(1)));
        assert_eq!(q.recv().await, Some(data(2)));
        assert_eq!(q.recv().await, None);
        // Drained and closed stays ended.
        assert_eq!(q.recv().await, None);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let q = PacketQueue::new(1);
        q.close();
        assert!(q.send(data(1)).await.is_err());
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_sender() {
        let q = Arc::new(PacketQueue::new(1));
        q.send(data(0)).await.unwrap();

        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.send(data(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.close();
        assert!(blocked.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_receiver() {
        let q = Arc::new(PacketQueue::new(1));
        let q2 = q.clone();
        let receiver = tokio::spawn(async move { q2.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.close();
        assert_eq!(receiver.await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let q = PacketQueue::new(2);
        q.send(data(1)).await.unwrap();
        q.close();
        q.close();
        assert_eq!(q.recv().await, Some(data(1)));
        assert_eq!(q.recv().await, None);
    }

    #[tokio::test]
    async fn try_recv_polls_without_blocking() {
        let q = PacketQueue::new(2);
        assert_eq!(q.try_recv(), None);
        q.send(data(3)).await.unwrap();
        assert_eq!(q.try_recv(), Some(data(3)));
        assert_eq!(q.try_recv(), None);
    }
}
