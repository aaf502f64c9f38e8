use crate::consts::{BROADCAST_ADDRESS, MAX_MASTER_ADDRESS};
use core::ops::RangeInclusive;

const TIMEOUT_RANGE_MS: RangeInclusive<u32> = 1..=60_000;
const SLOT_RANGE_MS: RangeInclusive<u32> = 1..=1_000;
const USAGE_TIMEOUT_RANGE_MS: RangeInclusive<u32> = 20..=35;

/// MS/TP station parameters
///
/// These parameters configure the behavior of the MS/TP station.  The timing values are the ones
/// defined by ASHRAE 135 Clause 9 and should only be changed when the bus requires it (e.g. to
/// cope with the latency of USB-RS485 converters).
///
/// # Example
/// ```
/// use bacnet_mstp::mstp;
///
/// let param = mstp::Parameters {
///     address: 2,
///     baudrate: bacnet_mstp::Baudrate::B76800,
///     .. Default::default()
/// };
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Parameters {
    /// TS: Station address of this node
    pub address: crate::Address,
    /// Baudrate
    pub baudrate: crate::Baudrate,
    /// Highest address a master on this bus may have
    pub max_master: crate::Address,
    /// Maximum number of data frames sent per token possession
    pub max_info_frames: u8,
    /// Operate as a slave even though the address would allow being a master
    pub slave_mode: bool,
    /// Capacity of the outgoing PDU queue
    pub queue_capacity: usize,
    /// T<sub>no_token</sub>: Silence after which the token is considered lost (ms)
    pub no_token_ms: u32,
    /// T<sub>slot</sub>: Width of the per-address token generation slot (ms)
    pub slot_ms: u32,
    /// T<sub>reply_timeout</sub>: Time to wait for a station to start replying (ms)
    pub reply_timeout_ms: u32,
    /// T<sub>reply_delay</sub>: Time within which a reply must be started (ms)
    pub reply_delay_ms: u32,
    /// T<sub>usage_timeout</sub>: Time to wait for a station to use the token or answer a poll
    /// (ms)
    pub usage_timeout_ms: u32,
    /// N<sub>poll</sub>: Number of tokens between maintenance polls for new masters
    pub poll_interval: u8,
    /// N<sub>retry_token</sub>: Retries of a token pass that was not picked up
    pub token_retries: u8,
    /// N<sub>min_octets</sub>: Received octets needed to consider the bus active
    pub min_octets: u8,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            address: 1,
            baudrate: crate::Baudrate::B38400,
            max_master: MAX_MASTER_ADDRESS,
            max_info_frames: 1,
            slave_mode: false,
            queue_capacity: 8,
            no_token_ms: 500,
            slot_ms: 10,
            reply_timeout_ms: 255,
            reply_delay_ms: 250,
            usage_timeout_ms: 20,
            poll_interval: 50,
            token_retries: 1,
            min_octets: 4,
        }
    }
}

impl Parameters {
    /// Whether a station with these parameters takes part in token passing.
    #[inline]
    pub fn is_master(&self) -> bool {
        !self.slave_mode && self.address <= MAX_MASTER_ADDRESS && self.address <= self.max_master
    }

    /// Whether a station with these parameters answers requests as a slave.
    #[inline]
    pub fn is_slave(&self) -> bool {
        !self.is_master() && self.address != BROADCAST_ADDRESS
    }

    /// T<sub>frame_abort</sub> for the configured baudrate (ms)
    pub fn frame_abort_ms(&self) -> u32 {
        self.baudrate.frame_abort_ms()
    }

    /// Silence after which this station generates a new token.
    ///
    /// Calculated as T<sub>no_token</sub> + T<sub>slot</sub> * TS.
    pub fn token_generation_timeout_ms(&self) -> u32 {
        self.slot_end_ms(u32::from(self.address))
    }

    /// Start of token generation slot `slot`: T<sub>no_token</sub> + T<sub>slot</sub> * slot.
    ///
    /// Saturates instead of overflowing for unusual timing values.
    pub fn slot_end_ms(&self, slot: u32) -> u32 {
        self.no_token_ms.saturating_add(self.slot_ms.saturating_mul(slot))
    }

    /// Successor of `address` in the ring of possible master addresses.
    #[inline]
    pub fn next_address(&self, address: crate::Address) -> crate::Address {
        let next = (u16::from(address) + 1) % (u16::from(self.max_master) + 1);
        // always < max_master + 1 <= 128
        next as u8
    }

    pub(crate) fn debug_assert_consistency(&self) {
        debug_assert!(self.max_master <= MAX_MASTER_ADDRESS);
        debug_assert!(self.max_info_frames >= 1);
        debug_assert!(self.queue_capacity >= 1);
        if self.address <= MAX_MASTER_ADDRESS && !self.slave_mode {
            debug_assert!(self.address <= self.max_master);
        }
    }
}

/// Builder for [`Parameters`]
///
/// Values outside of the legal ranges are ignored and the previous value is kept.
///
/// # Example
/// ```
/// use bacnet_mstp::mstp;
///
/// let param = mstp::ParametersBuilder::new(7, bacnet_mstp::Baudrate::B38400)
///     .max_master(16)
///     .max_info_frames(4)
///     .build();
/// assert_eq!(param.max_master, 16);
/// ```
#[derive(Debug, Clone)]
pub struct ParametersBuilder(Parameters);

impl ParametersBuilder {
    #[inline]
    pub fn new(address: crate::Address, baudrate: crate::Baudrate) -> Self {
        Self(Parameters {
            address,
            baudrate,
            ..Default::default()
        })
    }

    #[inline]
    pub fn max_master(&mut self, max_master: crate::Address) -> &mut Self {
        if max_master <= MAX_MASTER_ADDRESS {
            self.0.max_master = max_master;
        }
        self
    }

    #[inline]
    pub fn max_info_frames(&mut self, max_info_frames: u8) -> &mut Self {
        if max_info_frames >= 1 {
            self.0.max_info_frames = max_info_frames;
        }
        self
    }

    #[inline]
    pub fn slave_mode(&mut self, slave_mode: bool) -> &mut Self {
        self.0.slave_mode = slave_mode;
        self
    }

    #[inline]
    pub fn queue_capacity(&mut self, queue_capacity: usize) -> &mut Self {
        if queue_capacity >= 1 {
            self.0.queue_capacity = queue_capacity;
        }
        self
    }

    /// Accepts 1ms to 60s.
    #[inline]
    pub fn no_token_ms(&mut self, no_token_ms: u32) -> &mut Self {
        if TIMEOUT_RANGE_MS.contains(&no_token_ms) {
            self.0.no_token_ms = no_token_ms;
        }
        self
    }

    /// Accepts 1ms to 1s.
    #[inline]
    pub fn slot_ms(&mut self, slot_ms: u32) -> &mut Self {
        if SLOT_RANGE_MS.contains(&slot_ms) {
            self.0.slot_ms = slot_ms;
        }
        self
    }

    /// Accepts 1ms to 60s.
    #[inline]
    pub fn reply_timeout_ms(&mut self, reply_timeout_ms: u32) -> &mut Self {
        if TIMEOUT_RANGE_MS.contains(&reply_timeout_ms) {
            self.0.reply_timeout_ms = reply_timeout_ms;
        }
        self
    }

    /// Accepts 1ms to 60s.
    #[inline]
    pub fn reply_delay_ms(&mut self, reply_delay_ms: u32) -> &mut Self {
        if TIMEOUT_RANGE_MS.contains(&reply_delay_ms) {
            self.0.reply_delay_ms = reply_delay_ms;
        }
        self
    }

    /// The standard allows values between 20ms and 35ms.
    #[inline]
    pub fn usage_timeout_ms(&mut self, usage_timeout_ms: u32) -> &mut Self {
        if USAGE_TIMEOUT_RANGE_MS.contains(&usage_timeout_ms) {
            self.0.usage_timeout_ms = usage_timeout_ms;
        }
        self
    }

    #[inline]
    pub fn poll_interval(&mut self, poll_interval: u8) -> &mut Self {
        if poll_interval >= 1 {
            self.0.poll_interval = poll_interval;
        }
        self
    }

    #[inline]
    pub fn token_retries(&mut self, token_retries: u8) -> &mut Self {
        self.0.token_retries = token_retries;
        self
    }

    pub fn build(&self) -> Parameters {
        let mut p = self.0.clone();
        if p.address <= MAX_MASTER_ADDRESS && p.address > p.max_master && !p.slave_mode {
            log::debug!(
                "Raising max_master from {} to station address {}",
                p.max_master,
                p.address
            );
            p.max_master = p.address;
        }
        p.debug_assert_consistency();
        p
    }
}
