// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RFC 9221 unreliable datagram queues.
//!
//! Both directions are bounded. The send queue drops from the head on
//! overflow (the oldest datagram is the least likely to still be
//! useful), and the receive queue does the same.

use alloc::collections::VecDeque;
use bytes::Bytes;

/// Rejection reasons for [`SendQueue::push`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The peer did not negotiate datagram support
    NotSupported,
    /// The datagram exceeds the peer's max_datagram_frame_size or the
    /// path MTU
    TooLarge,
}

impl core::fmt::Display for SendError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::NotSupported => write!(f, "peer does not accept datagrams"),
            Self::TooLarge => write!(f, "datagram exceeds the negotiated size"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SendError {}

/// Outgoing datagrams awaiting packet space
#[derive(Debug)]
pub struct SendQueue {
    queue: VecDeque<Bytes>,
    capacity: usize,
    /// The peer's max_datagram_frame_size, zero until negotiated
    max_frame_size: u64,
    dropped: u64,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            max_frame_size: 0,
            dropped: 0,
        }
    }

    /// Applies the peer's negotiated max_datagram_frame_size
    pub fn on_transport_parameters(&mut self, max_frame_size: u64) {
        self.max_frame_size = max_frame_size;
    }

    //= https://www.rfc-editor.org/rfc/rfc9221#section-5
    //# if a QUIC endpoint buffers DATAGRAM frames, ... it can
    //# discard older frames to make room for newer ones
    /// Enqueues a datagram, head-dropping on overflow.
    ///
    /// Returns the number of datagrams dropped to make room.
    pub fn push(&mut self, data: Bytes) -> Result<usize, SendError> {
        if self.max_frame_size == 0 {
            return Err(SendError::NotSupported);
        }
        // the frame tag and length prefix must also fit
        if data.len() as u64 + 4 > self.max_frame_size {
            return Err(SendError::TooLarge);
        }

        let mut dropped = 0;
        while self.queue.len() >= self.capacity {
            self.queue.pop_front();
            dropped += 1;
        }
        self.queue.push_back(data);
        self.dropped += dropped as u64;
        Ok(dropped)
    }

    /// The next datagram that fits in `remaining_capacity` wire bytes.
    ///
    /// Datagrams too large for the current packet stay queued; a
    /// smaller later datagram may still be sent first.
    pub fn pop_fitting(&mut self, remaining_capacity: usize) -> Option<Bytes> {
        let index = self
            .queue
            .iter()
            .position(|data| data.len() + 4 <= remaining_capacity)?;
        self.queue.remove(index)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Incoming datagrams awaiting the application, delivered in arrival
/// order
#[derive(Debug)]
pub struct RecvQueue {
    queue: VecDeque<Bytes>,
    capacity: usize,
    dropped: u64,
}

impl RecvQueue {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueues a received datagram, returning the number head-dropped
    pub fn push(&mut self, data: Bytes) -> usize {
        let mut dropped = 0;
        while self.queue.len() >= self.capacity {
            self.queue.pop_front();
            dropped += 1;
        }
        self.queue.push_back(data);
        self.dropped += dropped as u64;
        dropped
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SendQueue {
        let mut queue = SendQueue::new(4);
        queue.on_transport_parameters(65535);
        queue
    }

    #[test]
    fn rejects_before_negotiation() {
        let mut queue = SendQueue::new(4);
        assert_eq!(
            queue.push(Bytes::from_static(b"x")),
            Err(SendError::NotSupported)
        );
    }

    #[test]
    fn rejects_oversized() {
        let mut queue = SendQueue::new(4);
        queue.on_transport_parameters(16);
        assert!(queue.push(Bytes::from_static(b"0123456789ab")).is_ok());
        assert_eq!(
            queue.push(Bytes::from_static(b"0123456789abc")),
            Err(SendError::TooLarge)
        );
    }

    /// Overflowing a capacity-4 queue with 6 datagrams drops the first two
    #[test]
    fn head_drop_on_overflow() {
        let mut queue = queue();
        let mut total_dropped = 0;
        for index in 0u8..6 {
            total_dropped += queue.push(Bytes::copy_from_slice(&[index])).unwrap();
        }
        assert_eq!(total_dropped, 2);
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.len(), 4);

        // the survivors are the newest four, in order
        let first = queue.pop_fitting(1500).unwrap();
        assert_eq!(first.as_ref(), &[2]);
    }

    #[test]
    fn pop_fitting_skips_large_heads() {
        let mut queue = queue();
        queue.push(Bytes::from_static(&[0; 1000])).unwrap();
        queue.push(Bytes::from_static(&[1; 10])).unwrap();

        // a small packet budget passes over the large head
        let popped = queue.pop_fitting(100).unwrap();
        assert_eq!(popped.len(), 10);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_fitting(100).is_none());
    }

    #[test]
    fn recv_order_and_overflow() {
        let mut queue = RecvQueue::new(2);
        assert_eq!(queue.push(Bytes::from_static(&[1])), 0);
        assert_eq!(queue.push(Bytes::from_static(&[2])), 0);
        assert_eq!(queue.push(Bytes::from_static(&[3])), 1);

        assert_eq!(queue.pop().unwrap().as_ref(), &[2]);
        assert_eq!(queue.pop().unwrap().as_ref(), &[3]);
        assert!(queue.pop().is_none());
        assert_eq!(queue.dropped(), 1);
    }
}
