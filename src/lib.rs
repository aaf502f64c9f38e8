//! # `bacnet-mstp` - A BACnet MS/TP datalink
//!
//! _bacnet-mstp_ implements the _Master-Slave/Token-Passing_ datalink that BACnet uses on
//! RS-485 busses.  It is structured in layers:
//!
//! - The [`phy`] module abstracts physical interfaces for RS-485 communication.
//! - The [`mstp`] module implements the MS/TP datalink itself: frame encoding, the receive state
//!   machine, token passing between master stations and answering requests as a slave.
//! - The [`datalink`] module is the interface for the BACnet network layer above.  PDUs are
//!   queued for transmission and received PDUs are picked up from here.
//!
//! # Example
//! ```no_run
//! use bacnet_mstp::{mstp, phy, Baudrate};
//!
//! // Set up the MS/TP station and parameterize it:
//! // =============================================
//! let mut station = mstp::MstpStation::new(
//!     mstp::ParametersBuilder::new(3, Baudrate::B38400)
//!         .max_master(32)
//!         .max_info_frames(4)
//!         .build(),
//!     mstp::StdSilenceTimer::new(),
//! );
//!
//! // The datalink handle can be moved to the network layer (even to another thread):
//! // ================================================================================
//! let datalink = station.datalink();
//! std::thread::spawn(move || loop {
//!     if let Some(packet) = datalink.receive(std::time::Duration::from_millis(1000)) {
//!         println!("PDU from {:?}: {:02x?}", packet.address, packet.pdu);
//!     }
//! });
//!
//! // Initialize the PHY layer:
//! // =========================
//! let mut phy = phy::SerialPortPhy::new("/dev/ttyUSB0", station.parameters().baudrate)
//!     .expect("failed opening serial port");
//!
//! // Main bus cycle
//! // ==============
//! loop {
//!     station.poll(&mut phy);
//!     std::thread::sleep(std::time::Duration::from_micros(500));
//! }
//! ```
#![deny(unused_must_use)]

mod consts;
pub mod datalink;
pub mod mstp;
pub mod phy;

#[cfg(all(test, feature = "std"))]
pub mod test_utils;

pub use consts::{BROADCAST_ADDRESS, MAX_DATA_SIZE, MAX_MASTER_ADDRESS};

/// Station address on the MS/TP bus
///
/// Masters use addresses 0 to 127, slaves may use up to 254.  255 is the broadcast address.
pub type Address = u8;

/// Baudrate for MS/TP communication
///
/// All stations on one bus must use the same baudrate.  MS/TP devices are required to support
/// `B9600` and `B38400`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Baudrate {
    /// 9.6 kbit/s
    B9600,
    /// 19.2 kbit/s
    B19200,
    /// 38.4 kbit/s
    B38400,
    /// 57.6 kbit/s
    B57600,
    /// 76.8 kbit/s
    B76800,
    /// 115.2 kbit/s
    B115200,
}

impl Baudrate {
    /// Convert baudrate into its numeric value in bit/s.
    pub fn to_rate(self) -> u64 {
        match self {
            Baudrate::B9600 => 9600,
            Baudrate::B19200 => 19200,
            Baudrate::B38400 => 38400,
            Baudrate::B57600 => 57600,
            Baudrate::B76800 => 76800,
            Baudrate::B115200 => 115200,
        }
    }

    /// Find the baudrate for a numeric value in bit/s.
    ///
    /// Returns `None` for rates that MS/TP does not allow.
    pub fn from_rate(rate: u32) -> Option<Self> {
        match rate {
            9600 => Some(Baudrate::B9600),
            19200 => Some(Baudrate::B19200),
            38400 => Some(Baudrate::B38400),
            57600 => Some(Baudrate::B57600),
            76800 => Some(Baudrate::B76800),
            115200 => Some(Baudrate::B115200),
            _ => None,
        }
    }

    /// At this baudrate, return how long a given number of bits take to transmit.
    pub fn bits_to_time(self, bits: u32) -> std::time::Duration {
        std::time::Duration::from_micros(u64::from(bits) * 1000000 / self.to_rate())
    }

    /// At this baudrate, return how many bits could be transmitted in the given time.
    pub fn time_to_bits(self, time: std::time::Duration) -> u64 {
        let bits = time.as_micros() * u128::from(self.to_rate()) / 1000000;
        u64::try_from(bits).unwrap_or(u64::MAX)
    }

    /// T<sub>frame_abort</sub> in milliseconds
    ///
    /// 60 bit times, rounded up to the next full millisecond.  Never exceeds 100ms.
    pub fn frame_abort_ms(self) -> u32 {
        let ms = 1 + 60 * 1000 / self.to_rate();
        u32::try_from(ms.min(100)).unwrap_or(100)
    }
}
