use crate::consts::{
    BROADCAST_ADDRESS, DATA_CRC_RESIDUE, DATA_CRC_SIZE, HEADER_CRC_RESIDUE, HEADER_SIZE,
    MAX_DATA_SIZE, PREAMBLE1, PREAMBLE2,
};
use crate::mstp::crc;

/// MS/TP frame type
///
/// Values 8 to 127 are reserved by ASHRAE, 128 to 255 are available for proprietary frames.
/// Both ranges are carried as [`FrameType::Other`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum FrameType {
    /// Token
    Token,
    /// Poll For Master
    PollForMaster,
    /// Reply To Poll For Master
    ReplyToPollForMaster,
    /// Test_Request
    TestRequest,
    /// Test_Response
    TestResponse,
    /// BACnet Data Expecting Reply
    DataExpectingReply,
    /// BACnet Data Not Expecting Reply
    DataNotExpectingReply,
    /// Reply Postponed
    ReplyPostponed,
    /// Reserved or proprietary frame type
    Other(u8),
}

impl From<u8> for FrameType {
    fn from(b: u8) -> Self {
        match b {
            0 => Self::Token,
            1 => Self::PollForMaster,
            2 => Self::ReplyToPollForMaster,
            3 => Self::TestRequest,
            4 => Self::TestResponse,
            5 => Self::DataExpectingReply,
            6 => Self::DataNotExpectingReply,
            7 => Self::ReplyPostponed,
            b => Self::Other(b),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> Self {
        match t {
            FrameType::Token => 0,
            FrameType::PollForMaster => 1,
            FrameType::ReplyToPollForMaster => 2,
            FrameType::TestRequest => 3,
            FrameType::TestResponse => 4,
            FrameType::DataExpectingReply => 5,
            FrameType::DataNotExpectingReply => 6,
            FrameType::ReplyPostponed => 7,
            FrameType::Other(b) => b,
        }
    }
}

impl FrameType {
    /// Whether this frame carries a BACnet PDU.
    #[inline(always)]
    pub fn is_data(self) -> bool {
        matches!(
            self,
            FrameType::DataExpectingReply | FrameType::DataNotExpectingReply
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    #[error("missing preamble")]
    BadPreamble,
    #[error("header CRC mismatch")]
    HeaderCrc,
    #[error("data CRC mismatch")]
    DataCrc,
    #[error("data length {0} exceeds the maximum frame size")]
    TooLong(u16),
}

/// Header of an MS/TP frame
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    /// Destination Address
    pub destination: crate::Address,
    /// Source Address
    pub source: crate::Address,
    /// Length of the data field (without data CRC)
    pub length: u16,
}

impl FrameHeader {
    #[inline(always)]
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ADDRESS
    }

    /// Write preamble, header and header CRC into `buffer`.
    ///
    /// Returns 0 if the buffer is too small.
    pub fn serialize(&self, buffer: &mut [u8]) -> usize {
        if buffer.len() < HEADER_SIZE {
            return 0;
        }

        buffer[0] = PREAMBLE1;
        buffer[1] = PREAMBLE2;
        buffer[2] = self.frame_type.into();
        buffer[3] = self.destination;
        buffer[4] = self.source;
        buffer[5..7].copy_from_slice(&self.length.to_be_bytes());
        buffer[7] = crc::header_crc(&buffer[2..7]);

        HEADER_SIZE
    }

    /// Length of the whole frame on the wire.
    pub fn frame_length(&self) -> usize {
        match self.length {
            0 => HEADER_SIZE,
            l => HEADER_SIZE + usize::from(l) + DATA_CRC_SIZE,
        }
    }
}

/// Parse the eight header octets at the start of `buffer`.
///
/// Returns `None` when the buffer is too short, the preamble is missing or the header CRC does
/// not match.
pub fn parse_header(buffer: &[u8]) -> Option<FrameHeader> {
    match decode_header(buffer)? {
        Ok(header) => Some(header),
        Err(e) => {
            log::trace!("Discarding header: {e}");
            None
        }
    }
}

fn decode_header(buffer: &[u8]) -> Option<Result<FrameHeader, FrameError>> {
    if buffer.len() < HEADER_SIZE {
        return None;
    }

    if buffer[0] != PREAMBLE1 || buffer[1] != PREAMBLE2 {
        return Some(Err(FrameError::BadPreamble));
    }

    let residue = buffer[2..HEADER_SIZE]
        .iter()
        .fold(crc::HEADER_CRC_INIT, |c, b| crc::header_crc_update(*b, c));
    if residue != HEADER_CRC_RESIDUE {
        return Some(Err(FrameError::HeaderCrc));
    }

    Some(Ok(FrameHeader {
        frame_type: FrameType::from(buffer[2]),
        destination: buffer[3],
        source: buffer[4],
        length: u16::from_be_bytes([buffer[5], buffer[6]]),
    }))
}

/// Build a complete frame into `buffer`.
///
/// Returns the number of octets written, or 0 if the frame would not fit into `buffer` or the
/// data is longer than any MS/TP frame may be.
pub fn construct_frame(
    buffer: &mut [u8],
    frame_type: FrameType,
    destination: crate::Address,
    source: crate::Address,
    data: &[u8],
) -> usize {
    if data.len() > MAX_DATA_SIZE {
        return 0;
    }
    let header = FrameHeader {
        frame_type,
        destination,
        source,
        // bounded by MAX_DATA_SIZE above
        length: data.len() as u16,
    };
    let frame_length = header.frame_length();
    if buffer.len() < frame_length {
        return 0;
    }

    let mut cursor = header.serialize(buffer);
    if !data.is_empty() {
        buffer[cursor..cursor + data.len()].copy_from_slice(data);
        cursor += data.len();
        buffer[cursor..cursor + DATA_CRC_SIZE].copy_from_slice(&crc::data_crc(data).to_le_bytes());
        cursor += DATA_CRC_SIZE;
    }

    debug_assert_eq!(cursor, frame_length);
    cursor
}

/// A complete MS/TP frame, borrowing its data from the receive buffer
#[derive(PartialEq, Eq, Clone)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub data: &'a [u8],
}

impl core::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:?} #{} -> #{}",
            self.header.frame_type, self.header.source, self.header.destination
        )?;
        if !self.data.is_empty() {
            write!(f, " {:02x?}", self.data)?;
        }
        Ok(())
    }
}

impl<'a> Frame<'a> {
    /// Decode one frame from the start of `buffer`.
    ///
    /// Returns `None` if the buffer does not yet contain a whole frame.  On success, the number
    /// of octets the frame occupied is returned alongside.
    pub fn deserialize(buffer: &'a [u8]) -> Option<Result<(Self, usize), FrameError>> {
        let header = match decode_header(buffer)? {
            Ok(h) => h,
            Err(e) => return Some(Err(e)),
        };

        if usize::from(header.length) > MAX_DATA_SIZE {
            return Some(Err(FrameError::TooLong(header.length)));
        }

        let frame_length = header.frame_length();
        if buffer.len() < frame_length {
            return None;
        }

        let data = &buffer[HEADER_SIZE..HEADER_SIZE + usize::from(header.length)];
        if !data.is_empty() {
            let residue = buffer[HEADER_SIZE..frame_length]
                .iter()
                .fold(crc::DATA_CRC_INIT, |c, b| crc::data_crc_update(*b, c));
            if residue != DATA_CRC_RESIDUE {
                return Some(Err(FrameError::DataCrc));
            }
        }

        Some(Ok((Frame { header, data }, frame_length)))
    }
}

/// Builder for frames that are about to be transmitted
pub struct FrameTx<'a> {
    buf: &'a mut [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTxResponse {
    bytes_sent: usize,
}

impl<'a> FrameTx<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn send_frame(
        self,
        frame_type: FrameType,
        da: crate::Address,
        sa: crate::Address,
        data: &[u8],
    ) -> FrameTxResponse {
        FrameTxResponse::new(construct_frame(self.buf, frame_type, da, sa, data))
    }

    pub fn send_token(self, da: crate::Address, sa: crate::Address) -> FrameTxResponse {
        self.send_frame(FrameType::Token, da, sa, &[])
    }

    pub fn send_poll_for_master(self, da: crate::Address, sa: crate::Address) -> FrameTxResponse {
        self.send_frame(FrameType::PollForMaster, da, sa, &[])
    }

    pub fn send_reply_to_poll_for_master(
        self,
        da: crate::Address,
        sa: crate::Address,
    ) -> FrameTxResponse {
        self.send_frame(FrameType::ReplyToPollForMaster, da, sa, &[])
    }

    pub fn send_reply_postponed(self, da: crate::Address, sa: crate::Address) -> FrameTxResponse {
        self.send_frame(FrameType::ReplyPostponed, da, sa, &[])
    }

    pub fn send_test_response(
        self,
        da: crate::Address,
        sa: crate::Address,
        data: &[u8],
    ) -> FrameTxResponse {
        self.send_frame(FrameType::TestResponse, da, sa, data)
    }
}

impl FrameTxResponse {
    pub fn new(bytes_sent: usize) -> Self {
        Self { bytes_sent }
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }
}
