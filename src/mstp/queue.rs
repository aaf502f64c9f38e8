//! Bounded queue of PDUs waiting for transmission.
use crate::consts::MAX_DATA_SIZE;
use crate::mstp::correlate::{is_reply_to, PduEnvelope};
use crate::mstp::FrameType;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("transmit queue is full")]
    QueueFull,
    #[error("PDU of {0} bytes exceeds the maximum frame data size")]
    PduTooLarge(usize),
    #[error("PDU is empty")]
    EmptyPdu,
    #[error("destination is not an MS/TP station address")]
    InvalidAddress,
}

/// A PDU waiting for its turn on the bus
#[derive(Clone)]
pub struct OutgoingPdu {
    buffer: [u8; MAX_DATA_SIZE],
    length: u16,
    destination: crate::Address,
    expects_reply: bool,
    in_flight: bool,
}

impl OutgoingPdu {
    pub fn new(
        destination: crate::Address,
        pdu: &[u8],
        expects_reply: bool,
    ) -> Result<Self, EnqueueError> {
        if pdu.is_empty() {
            return Err(EnqueueError::EmptyPdu);
        }
        if pdu.len() > MAX_DATA_SIZE {
            return Err(EnqueueError::PduTooLarge(pdu.len()));
        }

        let mut buffer = [0u8; MAX_DATA_SIZE];
        buffer[..pdu.len()].copy_from_slice(pdu);
        Ok(Self {
            buffer,
            // at most MAX_DATA_SIZE
            length: pdu.len() as u16,
            destination,
            expects_reply,
            in_flight: false,
        })
    }

    #[inline(always)]
    pub fn pdu(&self) -> &[u8] {
        &self.buffer[..usize::from(self.length)]
    }

    #[inline(always)]
    pub fn destination(&self) -> crate::Address {
        self.destination
    }

    #[inline(always)]
    pub fn expects_reply(&self) -> bool {
        self.expects_reply
    }

    /// Whether this PDU was sent and the station now waits for its reply.
    #[inline(always)]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn frame_type(&self) -> FrameType {
        if self.expects_reply {
            FrameType::DataExpectingReply
        } else {
            FrameType::DataNotExpectingReply
        }
    }

    fn envelope(&self, this_station: crate::Address) -> PduEnvelope<'_> {
        PduEnvelope {
            source: this_station,
            destination: self.destination,
            pdu: self.pdu(),
        }
    }
}

impl core::fmt::Debug for OutgoingPdu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutgoingPdu")
            .field("destination", &self.destination)
            .field("expects_reply", &self.expects_reply)
            .field("in_flight", &self.in_flight)
            .field("pdu", &self.pdu())
            .finish()
    }
}

/// Storage type that can hold one queued PDU.
#[derive(Default, Clone)]
pub struct PduStorage {
    inner: Option<OutgoingPdu>,
}

/// FIFO of outgoing PDUs with a fixed capacity
///
/// Besides plain FIFO operation, entries can be removed out of order when they turn out to be
/// the reply to a request received from another station.
pub struct PduQueue<'a> {
    slots: managed::ManagedSlice<'a, PduStorage>,
    head: usize,
    len: usize,
}

impl<'a> PduQueue<'a> {
    /// Create a queue using the given storage.
    ///
    /// The capacity of the queue is the length of the storage and never changes.
    pub fn new<S>(storage: S) -> Self
    where
        S: Into<managed::ManagedSlice<'a, PduStorage>>,
    {
        Self {
            slots: storage.into(),
            head: 0,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> PduQueue<'static> {
        PduQueue::new(vec![PduStorage::default(); capacity])
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn slot_index(&self, index: usize) -> usize {
        (self.head + index) % self.capacity()
    }

    /// Append a PDU at the tail.
    pub fn enqueue(&mut self, pdu: OutgoingPdu) -> Result<(), EnqueueError> {
        if self.is_full() {
            return Err(EnqueueError::QueueFull);
        }
        let index = self.slot_index(self.len);
        self.slots[index].inner = Some(pdu);
        self.len += 1;
        Ok(())
    }

    /// Entry at position `index`, counted from the head.
    pub fn get(&self, index: usize) -> Option<&OutgoingPdu> {
        if index >= self.len {
            return None;
        }
        self.slots[self.slot_index(index)].inner.as_ref()
    }

    #[inline]
    pub fn peek(&self) -> Option<&OutgoingPdu> {
        self.get(0)
    }

    /// Entry following the one at position `index`.
    #[inline]
    pub fn peek_next(&self, index: usize) -> Option<&OutgoingPdu> {
        self.get(index.checked_add(1)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutgoingPdu> {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Remove the head entry.
    pub fn pop(&mut self) -> Option<OutgoingPdu> {
        self.pop_element(0)
    }

    /// Remove the entry at position `index`, keeping the order of all others.
    pub fn pop_element(&mut self, index: usize) -> Option<OutgoingPdu> {
        if index >= self.len {
            return None;
        }
        let slot = self.slot_index(index);
        let element = self.slots[slot].inner.take();

        if index == 0 {
            self.head = self.slot_index(1);
        } else {
            // Close the gap by moving all following entries one slot towards the head.
            for i in index..self.len - 1 {
                let following = self.slot_index(i + 1);
                let next = self.slots[following].inner.take();
                let current = self.slot_index(i);
                self.slots[current].inner = next;
            }
        }
        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        element
    }

    /// Head entry, if it has not been sent yet.
    pub fn next_to_send(&self) -> Option<&OutgoingPdu> {
        self.peek().filter(|pdu| !pdu.in_flight)
    }

    /// Mark the head entry as sent and awaiting its reply.
    pub fn mark_in_flight(&mut self) {
        if self.is_empty() {
            return;
        }
        let head = self.head;
        if let Some(pdu) = self.slots[head].inner.as_mut() {
            pdu.in_flight = true;
        }
    }

    /// Remove the in-flight head entry without having received a matching reply.
    pub fn abandon_in_flight(&mut self) -> Option<OutgoingPdu> {
        if self.peek()?.in_flight {
            self.pop()
        } else {
            None
        }
    }

    /// Remove the in-flight head entry if `reply` answers it.
    pub fn take_request_answered_by(
        &mut self,
        reply: PduEnvelope,
        this_station: crate::Address,
    ) -> Option<OutgoingPdu> {
        let head = self.peek()?;
        if head.in_flight && is_reply_to(head.envelope(this_station), reply) {
            self.pop()
        } else {
            None
        }
    }

    /// Find and remove a queued PDU that answers `request`.
    ///
    /// The first matching entry is taken, wherever it is in the queue.
    pub fn take_reply_for(
        &mut self,
        request: PduEnvelope,
        this_station: crate::Address,
    ) -> Option<OutgoingPdu> {
        let index = self
            .iter()
            .position(|pdu| !pdu.in_flight && is_reply_to(request, pdu.envelope(this_station)))?;
        self.pop_element(index)
    }
}

impl core::fmt::Debug for PduQueue<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
