//! Receive Frame State Machine
//!
//! Consumes octets from the PHY one at a time and assembles them into frames.  Header and data
//! CRCs are accumulated incrementally while octets arrive.
use crate::consts::{
    BROADCAST_ADDRESS, DATA_CRC_RESIDUE, DATA_CRC_SIZE, HEADER_CRC_RESIDUE, MAX_DATA_SIZE,
    PREAMBLE1, PREAMBLE2,
};
use crate::mstp::crc;
use crate::mstp::handoff::{FrameProducer, InboundFrame, ReceivedFrame};
use crate::mstp::{FrameHeader, FrameType, SilenceTimer};
use crate::phy::MstpPhy;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    /// Waiting for the first preamble octet
    Idle,
    /// Got the first preamble octet, waiting for the second
    Preamble,
    /// Receiving header octets, the sixth one is the header CRC
    Header { index: u8 },
    /// Receiving data and data CRC into the input buffer
    Data { index: usize },
    /// Receiving data that is not stored (not for us or too long)
    SkipData { index: usize },
}

/// Counters kept by the receive state machine
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStatistics {
    pub valid_frames: u32,
    pub valid_frames_not_for_us: u32,
    pub invalid_frames: u32,
}

#[derive(Debug)]
pub struct ReceiveFsm {
    this_station: crate::Address,
    frame_abort_ms: u32,
    state: State,
    header: [u8; 5],
    header_crc: u8,
    data_crc: u16,
    data: Vec<u8>,
    stats: ReceiveStatistics,
}

impl ReceiveFsm {
    pub fn new(param: &crate::mstp::Parameters) -> Self {
        Self {
            this_station: param.address,
            frame_abort_ms: param.frame_abort_ms(),
            state: State::Idle,
            header: [0; 5],
            header_crc: crc::HEADER_CRC_INIT,
            data_crc: crc::DATA_CRC_INIT,
            data: Vec::with_capacity(MAX_DATA_SIZE),
            stats: Default::default(),
        }
    }

    /// Update the address used to tell frames for us apart from others.
    pub fn set_this_station(&mut self, address: crate::Address) {
        self.this_station = address;
    }

    #[inline(always)]
    pub fn statistics(&self) -> ReceiveStatistics {
        self.stats
    }

    /// Whether a frame is currently being assembled.
    #[inline(always)]
    pub fn in_frame(&self) -> bool {
        self.state != State::Idle
    }

    fn decoded_header(&self) -> FrameHeader {
        FrameHeader {
            frame_type: FrameType::from(self.header[0]),
            destination: self.header[1],
            source: self.header[2],
            length: u16::from_be_bytes([self.header[3], self.header[4]]),
        }
    }

    fn is_for_us(&self, header: &FrameHeader) -> bool {
        header.destination == self.this_station || header.destination == BROADCAST_ADDRESS
    }

    fn finish(&mut self, outcome: ReceivedFrame) -> ReceivedFrame {
        self.state = State::Idle;
        let counter = match &outcome {
            ReceivedFrame::Valid(_) => &mut self.stats.valid_frames,
            ReceivedFrame::NotForUs(_) => &mut self.stats.valid_frames_not_for_us,
            ReceivedFrame::Invalid => &mut self.stats.invalid_frames,
        };
        *counter = counter.wrapping_add(1);
        outcome
    }

    /// Feed one received octet.
    ///
    /// Returns the outcome when this octet completed (or broke) a frame.
    pub fn receive_byte(&mut self, byte: u8) -> Option<ReceivedFrame> {
        match self.state {
            State::Idle => {
                if byte == PREAMBLE1 {
                    self.state = State::Preamble;
                }
                None
            }
            State::Preamble => {
                match byte {
                    PREAMBLE2 => {
                        self.header_crc = crc::HEADER_CRC_INIT;
                        self.state = State::Header { index: 0 };
                    }
                    // Repeated preamble octet, keep waiting for the second one
                    PREAMBLE1 => (),
                    _ => self.state = State::Idle,
                }
                None
            }
            State::Header { index } => {
                self.header_crc = crc::header_crc_update(byte, self.header_crc);
                if index < 5 {
                    self.header[usize::from(index)] = byte;
                    self.state = State::Header { index: index + 1 };
                    return None;
                }

                if self.header_crc != HEADER_CRC_RESIDUE {
                    log::debug!("Discarding frame with bad header CRC");
                    return Some(self.finish(ReceivedFrame::Invalid));
                }

                let header = self.decoded_header();
                if header.length == 0 {
                    let outcome = if self.is_for_us(&header) {
                        ReceivedFrame::Valid(InboundFrame {
                            header,
                            data: Vec::new(),
                        })
                    } else {
                        ReceivedFrame::NotForUs(header)
                    };
                    return Some(self.finish(outcome));
                }

                self.data_crc = crc::DATA_CRC_INIT;
                self.data.clear();
                if self.is_for_us(&header) && usize::from(header.length) <= MAX_DATA_SIZE {
                    self.state = State::Data { index: 0 };
                } else {
                    self.state = State::SkipData { index: 0 };
                }
                None
            }
            State::Data { index } | State::SkipData { index } => {
                let header = self.decoded_header();
                let length = usize::from(header.length);
                let storing = matches!(self.state, State::Data { .. });

                self.data_crc = crc::data_crc_update(byte, self.data_crc);
                if storing && index < length {
                    self.data.push(byte);
                }

                if index + 1 < length + DATA_CRC_SIZE {
                    self.state = if storing {
                        State::Data { index: index + 1 }
                    } else {
                        State::SkipData { index: index + 1 }
                    };
                    return None;
                }

                let outcome = if self.data_crc != DATA_CRC_RESIDUE {
                    log::debug!("Discarding {:?} frame with bad data CRC", header.frame_type);
                    ReceivedFrame::Invalid
                } else if storing {
                    ReceivedFrame::Valid(InboundFrame {
                        header,
                        data: core::mem::take(&mut self.data),
                    })
                } else if self.is_for_us(&header) {
                    log::debug!(
                        "Discarding frame with {} octets of data, exceeding the maximum",
                        length
                    );
                    ReceivedFrame::Invalid
                } else {
                    ReceivedFrame::NotForUs(header)
                };
                Some(self.finish(outcome))
            }
        }
    }

    /// Abort a partially received frame when the bus was silent for too long.
    pub fn check_timeout(&mut self, silence_ms: u32) -> Option<ReceivedFrame> {
        if silence_ms <= self.frame_abort_ms {
            return None;
        }
        match self.state {
            State::Idle => None,
            State::Preamble => {
                self.state = State::Idle;
                None
            }
            State::Header { .. } | State::Data { .. } | State::SkipData { .. } => {
                log::debug!("Frame aborted after {silence_ms}ms of silence");
                Some(self.finish(ReceivedFrame::Invalid))
            }
        }
    }

    /// Drain octets from the PHY until a frame is complete or no more data is pending.
    ///
    /// Completed frames are handed to `producer`.  Nothing is read while the previous frame was
    /// not yet consumed.  Returns `true` when a frame was handed off.
    pub fn poll<PHY: MstpPhy, T: SilenceTimer>(
        &mut self,
        phy: &mut PHY,
        timer: &T,
        producer: &mut FrameProducer,
    ) -> bool {
        if !producer.ready() {
            return false;
        }

        let outcome = phy.receive_data(|buffer| {
            for (i, byte) in buffer.iter().copied().enumerate() {
                timer.reset();
                producer.note_octet();
                if let Some(outcome) = self.receive_byte(byte) {
                    return (i + 1, Some(outcome));
                }
            }
            (buffer.len(), None)
        });

        match outcome.or_else(|| self.check_timeout(timer.elapsed_ms())) {
            Some(frame) => {
                producer.publish(frame);
                true
            }
            None => false,
        }
    }
}
