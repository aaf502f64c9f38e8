//! CRC accumulators for MS/TP frames.
//!
//! The header is protected by a CRC-8 (polynomial X<sup>8</sup> + X<sup>7</sup> + 1), the data
//! field by the CCITT CRC-16 in its reflected form.  Both registers start out all-ones and are
//! transmitted ones-complemented.  A receiver feeding the transmitted CRC octets through the same
//! accumulator ends up with a fixed residue (`0x55` for the header, `0xF0B8` for the data) when
//! the frame was received intact.

/// Initial value of the header CRC register.
pub const HEADER_CRC_INIT: u8 = 0xFF;
/// Initial value of the data CRC register.
pub const DATA_CRC_INIT: u16 = 0xFFFF;

/// Feed one octet into the header CRC register.
#[inline]
pub fn header_crc_update(byte: u8, crc: u8) -> u8 {
    let mut temp = u16::from(crc ^ byte);

    temp = temp
        ^ (temp << 1)
        ^ (temp << 2)
        ^ (temp << 3)
        ^ (temp << 4)
        ^ (temp << 5)
        ^ (temp << 6)
        ^ (temp << 7);

    // Combine the bits shifted out on the left-hand end
    ((temp & 0xfe) ^ ((temp >> 8) & 1)) as u8
}

/// Feed one octet into the data CRC register.
#[inline]
pub fn data_crc_update(byte: u8, crc: u16) -> u16 {
    let mut crc = crc ^ u16::from(byte);
    for _ in 0..8 {
        if crc & 0x0001 != 0 {
            crc = (crc >> 1) ^ 0x8408;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// Header CRC octet as it is transmitted for the given five header octets.
pub fn header_crc(header: &[u8]) -> u8 {
    !header
        .iter()
        .fold(HEADER_CRC_INIT, |crc, b| header_crc_update(*b, crc))
}

/// Data CRC as it is transmitted for the given data field (least significant octet first).
pub fn data_crc(data: &[u8]) -> u16 {
    !data
        .iter()
        .fold(DATA_CRC_INIT, |crc, b| data_crc_update(*b, crc))
}
