//! MS/TP Constants

/// First preamble octet
pub const PREAMBLE1: u8 = 0x55;
/// Second preamble octet
pub const PREAMBLE2: u8 = 0xFF;
/// Destination address for broadcast frames
pub const BROADCAST_ADDRESS: crate::Address = 255;
/// Highest address a master station may use
pub const MAX_MASTER_ADDRESS: crate::Address = 127;
/// Preamble, five header octets and the header CRC
pub const HEADER_SIZE: usize = 8;
/// Largest data field of a BACnet frame
pub const MAX_DATA_SIZE: usize = 501;
/// Two octets of data CRC follow a non-empty data field
pub const DATA_CRC_SIZE: usize = 2;
/// Largest complete frame on the wire
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_DATA_SIZE + DATA_CRC_SIZE;
/// CRC-8 register value after feeding a correct header including its CRC
pub const HEADER_CRC_RESIDUE: u8 = 0x55;
/// CRC-16 register value after feeding correct data including its CRC
pub const DATA_CRC_RESIDUE: u16 = 0xF0B8;
/// Network number for a global broadcast
pub const BACNET_BROADCAST_NETWORK: u16 = 0xFFFF;
/// Longest MAC address in a BACnet address
pub const MAX_MAC_LEN: usize = 7;
