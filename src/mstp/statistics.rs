/// Traffic counters of an MS/TP station
///
/// All counters wrap around on overflow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// Frames transmitted by this station
    pub transmit_frames: u32,
    /// Valid frames received for this station (or broadcast)
    pub receive_valid_frames: u32,
    /// Valid frames received for other stations
    pub receive_valid_frames_not_for_us: u32,
    /// Frames dropped due to bad preamble, CRC, length or framing
    pub receive_invalid_frames: u32,
    /// Data frames transmitted
    pub transmit_pdus: u32,
    /// Data frames delivered to the upper layer
    pub receive_pdus: u32,
    /// Number of times the token was considered lost
    pub lost_tokens: u32,
    /// Received PDUs dropped because the upper layer did not fetch the previous one
    pub receive_overruns: u32,
}

/// Counters maintained by the node state machines
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeStatistics {
    pub transmit_frames: u32,
    pub transmit_pdus: u32,
    pub receive_pdus: u32,
    pub lost_tokens: u32,
    pub receive_overruns: u32,
}

impl Statistics {
    pub(crate) fn merge(node: NodeStatistics, receive: crate::mstp::ReceiveStatistics) -> Self {
        Self {
            transmit_frames: node.transmit_frames,
            receive_valid_frames: receive.valid_frames,
            receive_valid_frames_not_for_us: receive.valid_frames_not_for_us,
            receive_invalid_frames: receive.invalid_frames,
            transmit_pdus: node.transmit_pdus,
            receive_pdus: node.receive_pdus,
            lost_tokens: node.lost_tokens,
            receive_overruns: node.receive_overruns,
        }
    }
}
