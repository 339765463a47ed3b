// net_queue.rs -- thread-safe packet queueing between reader threads and the
// main loop
//
// One reader thread per listening socket receives datagrams and enqueues
// them. The main thread blocks on the queue, which serialises all handling.

use std::net::SocketAddr;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

/// A received datagram with its source address and the index of the
/// listening socket it arrived on (replies go out the same socket).
#[derive(Clone)]
pub struct QueuedPacket {
    pub sock_index: usize,
    pub from: SocketAddr,
    pub data: Vec<u8>,
}

impl QueuedPacket {
    pub fn new(sock_index: usize, from: SocketAddr, data: Vec<u8>) -> Self {
        Self {
            sock_index,
            from,
            data,
        }
    }
}

/// Bounded packet queue. When full, producers drop packets rather than
/// block, which is the right failure mode for UDP.
pub struct PacketQueue {
    sender: Sender<QueuedPacket>,
    receiver: Receiver<QueuedPacket>,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Get a clone of the sender handle, one per reader thread.
    pub fn sender(&self) -> PacketQueueSender {
        PacketQueueSender {
            sender: self.sender.clone(),
        }
    }

    /// Receive a packet, blocking until one is available.
    ///
    /// Returns `None` only if every sender has been dropped.
    pub fn recv(&self) -> Option<QueuedPacket> {
        self.receiver.recv().ok()
    }

    /// Try to receive a packet without blocking.
    pub fn try_recv(&self) -> Option<QueuedPacket> {
        self.receiver.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// Sender handle for the packet queue (used by reader threads).
#[derive(Clone)]
pub struct PacketQueueSender {
    sender: Sender<QueuedPacket>,
}

impl PacketQueueSender {
    /// Try to send a packet without blocking.
    ///
    /// Returns `true` if sent, `false` if the queue is full (packet dropped)
    /// or the receiver is gone.
    pub fn try_send(&self, packet: QueuedPacket) -> bool {
        match self.sender.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Default queue capacity, sized for burst traffic without excessive memory.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
