//! Upper-layer interface of the MS/TP datalink
//!
//! The [`Datalink`] handle is what the network layer talks to.  It is cheap to clone and may be
//! used from any thread while the [`MstpStation`][crate::mstp::MstpStation] is polled elsewhere.
//!
//! # Example
//! ```
//! use bacnet_mstp::{datalink, mstp, Baudrate};
//!
//! let param = mstp::ParametersBuilder::new(3, Baudrate::B38400).build();
//! let station = mstp::MstpStation::new(param, mstp::StdSilenceTimer::new());
//! let dl = station.datalink();
//!
//! let who_is = [0x01, 0x20, 0xff, 0xff, 0x00, 0xff, 0x10, 0x08];
//! assert_eq!(dl.send(&datalink::broadcast_address(), &who_is), who_is.len());
//! assert!(!dl.queue_empty());
//! ```
use crate::consts::{BACNET_BROADCAST_NETWORK, BROADCAST_ADDRESS, MAX_DATA_SIZE, MAX_MAC_LEN};
use crate::mstp::{EnqueueError, OutgoingPdu, PduQueue};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound for a single [`Datalink::receive()`] wait
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_millis(1000);

/// Network-layer address of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BacnetAddress {
    /// Datalink address, only the first `mac_len` octets are used
    pub mac: [u8; MAX_MAC_LEN],
    /// Zero for the local broadcast
    pub mac_len: u8,
    /// Network number, 0 for the local network
    pub net: u16,
    /// Length of `adr`, zero for a station on the local network
    pub len: u8,
    /// Address on a remote network
    pub adr: [u8; MAX_MAC_LEN],
}

impl BacnetAddress {
    /// Address of a station on the local MS/TP segment.
    pub fn local(mac: crate::Address) -> Self {
        let mut address = Self {
            mac_len: 1,
            ..Default::default()
        };
        address.mac[0] = mac;
        address
    }

    /// MS/TP destination for this address, if it has one.
    ///
    /// A zero-length MAC means local broadcast.  MS/TP addresses are always one octet long.
    pub fn mstp_mac(&self) -> Option<crate::Address> {
        match self.mac_len {
            0 => Some(BROADCAST_ADDRESS),
            1 => Some(self.mac[0]),
            _ => None,
        }
    }

    /// Compare two addresses, ignoring octets beyond the used lengths.
    pub fn same_as(&self, other: &BacnetAddress) -> bool {
        let mac_len = usize::from(self.mac_len).min(MAX_MAC_LEN);
        let len = usize::from(self.len).min(MAX_MAC_LEN);
        self.mac_len == other.mac_len
            && self.mac[..mac_len] == other.mac[..mac_len]
            && self.net == other.net
            && self.len == other.len
            && self.adr[..len] == other.adr[..len]
    }
}

/// Address of the MS/TP station `mac` as seen by the upper layer.
///
/// The broadcast station address maps to an empty MAC.
pub fn fill_address(mac: crate::Address) -> BacnetAddress {
    if mac == BROADCAST_ADDRESS {
        BacnetAddress::default()
    } else {
        BacnetAddress::local(mac)
    }
}

/// Global broadcast address: MAC `[255]` on the broadcast network.
pub fn broadcast_address() -> BacnetAddress {
    BacnetAddress {
        net: BACNET_BROADCAST_NETWORK,
        ..BacnetAddress::local(BROADCAST_ADDRESS)
    }
}

/// A PDU delivered by the datalink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Sender of the PDU
    pub address: BacnetAddress,
    pub pdu: Vec<u8>,
}

/// Single-slot mailbox between the station and the upper layer
#[derive(Debug, Default)]
pub(crate) struct PacketSlot {
    packet: Mutex<Option<ReceivedPacket>>,
    ready: Condvar,
}

impl PacketSlot {
    fn lock(&self) -> MutexGuard<'_, Option<ReceivedPacket>> {
        self.packet.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a packet unless the previous one was not fetched yet.
    pub fn put(&self, packet: ReceivedPacket) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(packet);
        drop(slot);
        self.ready.notify_one();
        true
    }

    pub fn take(&self, timeout: Duration) -> Option<ReceivedPacket> {
        let slot = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |p| p.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }
}

struct Shared {
    queue: Mutex<PduQueue<'static>>,
    packet: PacketSlot,
}

/// Handle for sending and receiving PDUs through an MS/TP station
#[derive(Clone)]
pub struct Datalink {
    shared: Arc<Shared>,
}

impl Datalink {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(PduQueue::with_capacity(queue_capacity)),
                packet: PacketSlot::default(),
            }),
        }
    }

    pub(crate) fn queue(&self) -> MutexGuard<'_, PduQueue<'static>> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn deliver(&self, packet: ReceivedPacket) -> bool {
        self.shared.packet.put(packet)
    }

    /// Queue a PDU for transmission.
    ///
    /// Whether a reply is expected is taken from the NPDU control octet.  Broadcasts never expect
    /// a reply.  On success, the number of queued octets is returned.
    pub fn enqueue(&self, destination: &BacnetAddress, pdu: &[u8]) -> Result<usize, EnqueueError> {
        let destination = destination
            .mstp_mac()
            .ok_or(EnqueueError::InvalidAddress)?;
        let expects_reply =
            destination != BROADCAST_ADDRESS && crate::mstp::correlate::expects_reply(pdu);
        let outgoing = OutgoingPdu::new(destination, pdu, expects_reply)?;
        self.queue().enqueue(outgoing)?;
        log::trace!(
            "Queued {} octet PDU for #{destination} (expecting reply: {expects_reply})",
            pdu.len()
        );
        Ok(pdu.len())
    }

    /// Queue a PDU for transmission.
    ///
    /// Returns the number of octets accepted, or 0 when the PDU could not be queued (queue full,
    /// invalid destination, empty or oversized PDU).
    pub fn send(&self, destination: &BacnetAddress, pdu: &[u8]) -> usize {
        match self.enqueue(destination, pdu) {
            Ok(length) => length,
            Err(e) => {
                log::debug!("Dropping outgoing PDU: {e}");
                0
            }
        }
    }

    /// Wait up to `timeout` for the next received PDU.
    ///
    /// Waits never exceed [`MAX_RECEIVE_WAIT`].
    pub fn receive(&self, timeout: Duration) -> Option<ReceivedPacket> {
        self.shared.packet.take(timeout.min(MAX_RECEIVE_WAIT))
    }

    pub fn queue_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn queue_full(&self) -> bool {
        self.queue().is_full()
    }

    /// Largest PDU that fits into one frame.
    #[inline(always)]
    pub fn max_pdu_size(&self) -> usize {
        MAX_DATA_SIZE
    }
}

impl core::fmt::Debug for Datalink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Datalink")
            .field("queue", &*self.queue())
            .finish_non_exhaustive()
    }
}
