//! Matching of replies to data-expecting-reply requests.
//!
//! Only as much of the NPDU and APDU headers is decoded as is needed to decide whether one PDU
//! answers another.  All decoding is bounds-checked, truncated PDUs simply never match.
use crate::consts::MAX_MAC_LEN;
use crate::datalink::BacnetAddress;

bitflags::bitflags! {
    /// NPDU control octet
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NpduControl: u8 {
        /// The NPDU carries a network layer message instead of an APDU
        const NETWORK_MESSAGE = 0x80;
        /// DNET, DLEN, DADR and hop count are present
        const DESTINATION_SPECIFIER = 0x20;
        /// SNET, SLEN and SADR are present
        const SOURCE_SPECIFIER = 0x08;
        /// The sender expects a reply
        const EXPECTING_REPLY = 0x04;
        /// Network priority
        const PRIORITY = 0x03;
    }
}

/// Remote network address from the NPDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub net: u16,
    pub len: u8,
    pub adr: [u8; MAX_MAC_LEN],
}

/// Decoded NPDU header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Npdu {
    pub protocol_version: u8,
    pub control: NpduControl,
    pub destination: Option<NetworkAddress>,
    pub source: Option<NetworkAddress>,
    pub hop_count: Option<u8>,
    pub network_message_type: Option<u8>,
    /// Offset of the APDU (or network message payload) within the PDU
    pub apdu_offset: usize,
}

impl Npdu {
    #[inline(always)]
    pub fn is_network_message(&self) -> bool {
        self.control.contains(NpduControl::NETWORK_MESSAGE)
    }
}

fn decode_network_address(pdu: &[u8], offset: &mut usize) -> Option<NetworkAddress> {
    let net = u16::from_be_bytes([*pdu.get(*offset)?, *pdu.get(*offset + 1)?]);
    let len = *pdu.get(*offset + 2)?;
    *offset += 3;

    let mut adr = [0u8; MAX_MAC_LEN];
    let stored = usize::from(len).min(MAX_MAC_LEN);
    adr[..stored].copy_from_slice(pdu.get(*offset..*offset + stored)?);
    *offset += usize::from(len);

    Some(NetworkAddress { net, len, adr })
}

/// Decode the NPDU header at the start of `pdu`.
pub fn decode_npdu(pdu: &[u8]) -> Option<Npdu> {
    let protocol_version = *pdu.first()?;
    let control = NpduControl::from_bits_retain(*pdu.get(1)?);
    let mut offset = 2;

    let destination = if control.contains(NpduControl::DESTINATION_SPECIFIER) {
        Some(decode_network_address(pdu, &mut offset)?)
    } else {
        None
    };
    let source = if control.contains(NpduControl::SOURCE_SPECIFIER) {
        Some(decode_network_address(pdu, &mut offset)?)
    } else {
        None
    };
    let hop_count = if destination.is_some() {
        let hop_count = *pdu.get(offset)?;
        offset += 1;
        Some(hop_count)
    } else {
        None
    };
    let network_message_type = if control.contains(NpduControl::NETWORK_MESSAGE) {
        let message_type = *pdu.get(offset)?;
        offset += 1;
        Some(message_type)
    } else {
        None
    };

    Some(Npdu {
        protocol_version,
        control,
        destination,
        source,
        hop_count,
        network_message_type,
        apdu_offset: offset,
    })
}

/// Whether the sender of this NPDU expects a reply.
pub fn expects_reply(pdu: &[u8]) -> bool {
    pdu.get(1)
        .map(|c| NpduControl::from_bits_retain(*c).contains(NpduControl::EXPECTING_REPLY))
        .unwrap_or(false)
}

/// APDU type from the upper nibble of the first APDU octet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduType {
    ConfirmedRequest = 0x00,
    UnconfirmedRequest = 0x10,
    SimpleAck = 0x20,
    ComplexAck = 0x30,
    SegmentAck = 0x40,
    Error = 0x50,
    Reject = 0x60,
    Abort = 0x70,
}

impl ApduType {
    pub fn from_u8(b: u8) -> Option<ApduType> {
        match b & 0xF0 {
            0x00 => Some(Self::ConfirmedRequest),
            0x10 => Some(Self::UnconfirmedRequest),
            0x20 => Some(Self::SimpleAck),
            0x30 => Some(Self::ComplexAck),
            0x40 => Some(Self::SegmentAck),
            0x50 => Some(Self::Error),
            0x60 => Some(Self::Reject),
            0x70 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Segmented-message flag in the first octet of confirmed requests and complex acks
const APDU_SEGMENTED_MESSAGE: u8 = 0x08;

/// The parts of an APDU header relevant for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduHeader {
    pub pdu_type: ApduType,
    pub invoke_id: u8,
    /// Not present in reject, abort and segment-ack PDUs
    pub service_choice: Option<u8>,
}

/// Decode the header of a confirmed request.
pub fn decode_request_header(apdu: &[u8]) -> Option<ApduHeader> {
    let first = *apdu.first()?;
    if ApduType::from_u8(first)? != ApduType::ConfirmedRequest {
        return None;
    }
    let invoke_id = *apdu.get(2)?;
    let service_choice = if first & APDU_SEGMENTED_MESSAGE != 0 {
        *apdu.get(5)?
    } else {
        *apdu.get(3)?
    };
    Some(ApduHeader {
        pdu_type: ApduType::ConfirmedRequest,
        invoke_id,
        service_choice: Some(service_choice),
    })
}

/// Decode the header of any PDU that may answer a confirmed request.
pub fn decode_reply_header(apdu: &[u8]) -> Option<ApduHeader> {
    let first = *apdu.first()?;
    let pdu_type = ApduType::from_u8(first)?;
    let invoke_id = *apdu.get(1)?;
    let service_choice = match pdu_type {
        ApduType::SimpleAck | ApduType::Error => Some(*apdu.get(2)?),
        ApduType::ComplexAck if first & APDU_SEGMENTED_MESSAGE != 0 => Some(*apdu.get(4)?),
        ApduType::ComplexAck => Some(*apdu.get(2)?),
        ApduType::Reject | ApduType::Abort | ApduType::SegmentAck => None,
        ApduType::ConfirmedRequest | ApduType::UnconfirmedRequest => return None,
    };
    Some(ApduHeader {
        pdu_type,
        invoke_id,
        service_choice,
    })
}

/// A PDU together with the MS/TP addresses of the frame carrying it
#[derive(Debug, Clone, Copy)]
pub struct PduEnvelope<'a> {
    pub source: crate::Address,
    pub destination: crate::Address,
    pub pdu: &'a [u8],
}

fn full_address(mac: crate::Address, network: Option<NetworkAddress>) -> BacnetAddress {
    let mut address = BacnetAddress::local(mac);
    if let Some(network) = network {
        address.net = network.net;
        address.len = network.len;
        address.adr = network.adr;
    }
    address
}

/// Check whether `reply` answers the confirmed request `request`.
pub fn is_reply_to(request: PduEnvelope, reply: PduEnvelope) -> bool {
    let Some(request_npdu) = decode_npdu(request.pdu) else {
        return false;
    };
    if request_npdu.is_network_message() {
        log::trace!("No match: request is a network message");
        return false;
    }
    let Some(request_apdu) = request
        .pdu
        .get(request_npdu.apdu_offset..)
        .and_then(decode_request_header)
    else {
        log::trace!("No match: not a confirmed request");
        return false;
    };

    let Some(reply_npdu) = decode_npdu(reply.pdu) else {
        return false;
    };
    if reply_npdu.is_network_message() {
        log::trace!("No match: reply is a network message");
        return false;
    }
    let Some(reply_apdu) = reply
        .pdu
        .get(reply_npdu.apdu_offset..)
        .and_then(decode_reply_header)
    else {
        log::trace!("No match: not a reply PDU");
        return false;
    };

    if request_apdu.invoke_id != reply_apdu.invoke_id {
        log::trace!("No match: invoke ID mismatch");
        return false;
    }
    if let Some(service_choice) = reply_apdu.service_choice {
        if request_apdu.service_choice != Some(service_choice) {
            log::trace!("No match: service choice mismatch");
            return false;
        }
    }
    if request_npdu.protocol_version != reply_npdu.protocol_version {
        log::trace!("No match: protocol version mismatch");
        return false;
    }
    // Network priority is not compared, it is not carried through the upper layers.

    let request_source = full_address(request.source, request_npdu.source);
    let reply_destination = full_address(reply.destination, reply_npdu.destination);
    if !request_source.same_as(&reply_destination) {
        log::trace!("No match: reply is not addressed to the requester");
        return false;
    }

    let request_destination = full_address(request.destination, request_npdu.destination);
    let reply_source = full_address(reply.source, reply_npdu.source);
    if !request_destination.same_as(&reply_source) {
        log::trace!("No match: reply does not originate from the requested station");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ReadProperty request with invoke ID 0x12
    const READ_PROPERTY: &[u8] = &[
        0x01, 0x04, 0x00, 0x05, 0x12, 0x0C, 0x0C, 0x02, 0x00, 0x00, 0x01, 0x19, 0x4D,
    ];
    /// ComplexAck for the ReadProperty request above
    const READ_PROPERTY_ACK: &[u8] = &[
        0x01, 0x00, 0x30, 0x12, 0x0C, 0x0C, 0x02, 0x00, 0x00, 0x01, 0x19, 0x4D, 0x3E, 0x75, 0x04,
        0x00, 0x41, 0x42, 0x43, 0x3F,
    ];

    fn request(pdu: &[u8]) -> PduEnvelope<'_> {
        PduEnvelope {
            source: 3,
            destination: 7,
            pdu,
        }
    }

    fn reply(pdu: &[u8]) -> PduEnvelope<'_> {
        PduEnvelope {
            source: 7,
            destination: 3,
            pdu,
        }
    }

    #[test]
    fn decode_local_npdu() {
        let npdu = decode_npdu(READ_PROPERTY).unwrap();
        assert_eq!(npdu.protocol_version, 1);
        assert!(npdu.control.contains(NpduControl::EXPECTING_REPLY));
        assert_eq!(npdu.destination, None);
        assert_eq!(npdu.apdu_offset, 2);
        assert!(expects_reply(READ_PROPERTY));
        assert!(!expects_reply(READ_PROPERTY_ACK));
        assert!(!expects_reply(&[0x01]));
    }

    #[test]
    fn decode_routed_npdu() {
        // DNET 5 with 1 octet DADR, SNET 0x0102 with 2 octets SADR, hop count 255
        let pdu = &[
            0x01, 0x2C, 0x00, 0x05, 0x01, 0x09, 0x01, 0x02, 0x02, 0xAB, 0xCD, 0xFF, 0x00,
        ];
        let npdu = decode_npdu(pdu).unwrap();
        let destination = npdu.destination.unwrap();
        assert_eq!(destination.net, 5);
        assert_eq!(&destination.adr[..1], &[0x09]);
        let source = npdu.source.unwrap();
        assert_eq!(source.net, 0x0102);
        assert_eq!(&source.adr[..2], &[0xAB, 0xCD]);
        assert_eq!(npdu.hop_count, Some(0xFF));
        assert_eq!(npdu.apdu_offset, 12);

        // Truncated within SADR
        assert_eq!(decode_npdu(&pdu[..9]), None);
    }

    #[test]
    fn complex_ack_matches() {
        assert!(is_reply_to(request(READ_PROPERTY), reply(READ_PROPERTY_ACK)));
    }

    #[test]
    fn invoke_id_mismatch() {
        let mut ack = READ_PROPERTY_ACK.to_vec();
        ack[3] = 0x13;
        assert!(!is_reply_to(request(READ_PROPERTY), reply(&ack)));
    }

    #[test]
    fn service_choice_mismatch() {
        // SimpleAck for WriteProperty (15) does not answer a ReadProperty (12)
        let ack = &[0x01, 0x00, 0x20, 0x12, 0x0F];
        assert!(!is_reply_to(request(READ_PROPERTY), reply(ack)));
        let ack = &[0x01, 0x00, 0x20, 0x12, 0x0C];
        assert!(is_reply_to(request(READ_PROPERTY), reply(ack)));
    }

    #[test]
    fn abort_matches_on_invoke_id() {
        let abort = &[0x01, 0x00, 0x71, 0x12, 0x04];
        assert!(is_reply_to(request(READ_PROPERTY), reply(abort)));
        let reject = &[0x01, 0x00, 0x60, 0x12, 0x02];
        assert!(is_reply_to(request(READ_PROPERTY), reply(reject)));
        let reject = &[0x01, 0x00, 0x60, 0x11, 0x02];
        assert!(!is_reply_to(request(READ_PROPERTY), reply(reject)));
    }

    #[test]
    fn segmented_request_service_choice() {
        // Segmented ReadPropertyMultiple (14), sequence number and window size before service
        let request_pdu = &[0x01, 0x04, 0x08, 0x05, 0x21, 0x00, 0x04, 0x0E, 0x0C];
        let ack = &[0x01, 0x00, 0x30, 0x21, 0x0E, 0x1E];
        assert!(is_reply_to(request(request_pdu), reply(ack)));
    }

    #[test]
    fn wrong_addresses() {
        let other_destination = PduEnvelope {
            source: 7,
            destination: 4,
            pdu: READ_PROPERTY_ACK,
        };
        assert!(!is_reply_to(request(READ_PROPERTY), other_destination));

        let other_source = PduEnvelope {
            source: 8,
            destination: 3,
            pdu: READ_PROPERTY_ACK,
        };
        assert!(!is_reply_to(request(READ_PROPERTY), other_source));
    }

    #[test]
    fn routed_reply_must_go_back_to_remote_source() {
        // Request from SNET 9 / SADR 0x42, relayed by router at MAC 3
        let request_pdu = &[0x01, 0x0C, 0x00, 0x09, 0x01, 0x42, 0x00, 0x05, 0x12, 0x0C];
        // Reply with DNET 9 / DADR 0x42, hop count 255
        let ack = &[0x01, 0x20, 0x00, 0x09, 0x01, 0x42, 0xFF, 0x20, 0x12, 0x0C];
        assert!(is_reply_to(request(request_pdu), reply(ack)));

        // Reply to the local router instead of the remote station
        let ack = &[0x01, 0x00, 0x20, 0x12, 0x0C];
        assert!(!is_reply_to(request(request_pdu), reply(ack)));
    }

    #[test]
    fn network_messages_never_match() {
        let who_is_router = &[0x01, 0x80, 0x00];
        assert!(!is_reply_to(request(who_is_router), reply(READ_PROPERTY_ACK)));
        assert!(!is_reply_to(request(READ_PROPERTY), reply(who_is_router)));
    }

    #[test]
    fn protocol_version_mismatch() {
        let mut ack = READ_PROPERTY_ACK.to_vec();
        ack[0] = 0x02;
        assert!(!is_reply_to(request(READ_PROPERTY), reply(&ack)));
    }

    #[test]
    fn truncated_pdus_never_match() {
        // The service choice of the request is its sixth octet
        for len in 0..6 {
            assert!(!is_reply_to(request(&READ_PROPERTY[..len]), reply(READ_PROPERTY_ACK)));
        }
        for len in 0..3 {
            assert!(!is_reply_to(request(READ_PROPERTY), reply(&READ_PROPERTY_ACK[..len])));
        }
    }
}
