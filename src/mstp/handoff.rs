//! Handoff of received frames from the receive state machine to the node state machine.
//!
//! The two sides communicate over a channel that holds at most one frame.  Before it may start
//! assembling a frame, the producer must hold a permit.  The permit only returns to the producer
//! once the consumer has finished processing the previous frame.  Thus at most one completed,
//! unconsumed frame exists at any time.
//!
//! Besides frames, the producer counts received octets.  The node state machine uses this count
//! to detect bus activity while it waits for other stations.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// A frame that passed all integrity checks and is addressed to this station (or broadcast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub header: super::FrameHeader,
    pub data: Vec<u8>,
}

impl InboundFrame {
    #[inline(always)]
    pub fn frame_type(&self) -> super::FrameType {
        self.header.frame_type
    }

    #[inline(always)]
    pub fn source(&self) -> crate::Address {
        self.header.source
    }

    #[inline(always)]
    pub fn destination(&self) -> crate::Address {
        self.header.destination
    }
}

/// Outcome of receiving one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedFrame {
    /// Valid frame for this station or broadcast
    Valid(InboundFrame),
    /// Valid frame addressed to some other station
    NotForUs(super::FrameHeader),
    /// Corrupted, truncated or oversized frame
    Invalid,
}

/// Create a connected producer/consumer pair.
pub fn channel() -> (FrameProducer, FrameConsumer) {
    let (frame_tx, frame_rx) = mpsc::sync_channel(1);
    let (permit_tx, permit_rx) = mpsc::sync_channel(1);
    let event_count = Arc::new(AtomicU32::new(0));

    // The producer starts out with the right to assemble one frame.
    let _ = permit_tx.try_send(());

    (
        FrameProducer {
            frames: frame_tx,
            permits: permit_rx,
            holds_permit: false,
            event_count: event_count.clone(),
        },
        FrameConsumer {
            frames: frame_rx,
            permits: permit_tx,
            current: None,
            event_count,
        },
    )
}

/// Receive side of the handoff
#[derive(Debug)]
pub struct FrameProducer {
    frames: mpsc::SyncSender<ReceivedFrame>,
    permits: mpsc::Receiver<()>,
    holds_permit: bool,
    event_count: Arc<AtomicU32>,
}

impl FrameProducer {
    /// Whether the producer may start or continue assembling a frame.
    pub fn ready(&mut self) -> bool {
        if !self.holds_permit {
            self.holds_permit = self.permits.try_recv().is_ok();
        }
        self.holds_permit
    }

    /// Hand a completed frame to the consumer.
    ///
    /// Gives up the permit.  Must only be called after [`ready()`][Self::ready] returned `true`.
    pub fn publish(&mut self, frame: ReceivedFrame) {
        debug_assert!(self.holds_permit, "publishing a frame without permit");
        self.holds_permit = false;
        if self.frames.try_send(frame).is_err() {
            log::debug!("Frame consumer is gone, dropping received frame");
        }
    }

    /// Note reception of one octet (or one receive error).
    #[inline]
    pub fn note_octet(&self) {
        self.event_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Node side of the handoff
#[derive(Debug)]
pub struct FrameConsumer {
    frames: mpsc::Receiver<ReceivedFrame>,
    permits: mpsc::SyncSender<()>,
    current: Option<ReceivedFrame>,
    event_count: Arc<AtomicU32>,
}

impl FrameConsumer {
    /// Look at the pending frame without consuming it.
    pub fn peek(&mut self) -> Option<&ReceivedFrame> {
        if self.current.is_none() {
            self.current = self.frames.try_recv().ok();
        }
        self.current.as_ref()
    }

    /// Take the pending frame and allow the producer to receive the next one.
    pub fn take(&mut self) -> Option<ReceivedFrame> {
        self.peek();
        let frame = self.current.take();
        if frame.is_some() && self.permits.try_send(()).is_err() {
            log::debug!("Frame producer is gone");
        }
        frame
    }

    /// Number of octets received since the last [`clear_event_count()`][Self::clear_event_count].
    #[inline]
    pub fn event_count(&self) -> u32 {
        self.event_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn clear_event_count(&self) {
        self.event_count.store(0, Ordering::Relaxed);
    }
}
