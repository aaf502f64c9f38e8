//! Physical layer: access to the RS-485 bus
//!
//! The MS/TP station talks to the bus through the [`MstpPhy`] trait.  Implementations exist for
//! serial ports ([`SerialPortPhy`], feature `phy-serial`) and for an in-process bus simulation
//! ([`SimulatorPhy`], feature `phy-simulator`).
#[cfg(feature = "phy-serial")]
mod serial;
#[cfg(feature = "phy-serial")]
pub use serial::SerialPortPhy;

#[cfg(feature = "phy-simulator")]
mod simulator;
#[cfg(feature = "phy-simulator")]
pub use simulator::{CapturedFrame, SimulatorPhy};

/// Generic abstraction for the half-duplex RS-485 transceiver
///
/// All methods must return immediately.  Transmission and reception happen in the background and
/// are observed by polling.
pub trait MstpPhy {
    /// Poll an ongoing transmission.
    ///
    /// Should return `true` while the transmission is still ongoing and `false` once it has been
    /// completed.
    fn poll_transmission(&mut self) -> bool;

    /// Schedule transmission of some data.
    ///
    /// The data is written by the closure `f` into the buffer passed to it.  `f` then returns how
    /// many bytes were written.  Only this many bytes must be transmitted.
    ///
    /// **Important**: This function must not block on the actual transmission!
    ///
    /// # Panics
    /// This function may panic when a transmission is already ongoing.
    fn transmit_data<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R);

    /// Receive some data.
    ///
    /// The closure `f` is called with all bytes received so far.  It returns how many of them it
    /// consumed.  Unconsumed bytes are presented again on the next call.
    ///
    /// # Panics
    /// This function may panic when a transmission is ongoing.
    fn receive_data<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> (usize, R);

    /// Transmit a frame built by the closure `f`.
    ///
    /// Nothing is transmitted when `f` returns `None`.
    fn transmit_frame<F>(&mut self, f: F) -> Option<crate::mstp::FrameTxResponse>
    where
        F: FnOnce(crate::mstp::FrameTx) -> Option<crate::mstp::FrameTxResponse>,
    {
        self.transmit_data(|buffer| {
            let response = f(crate::mstp::FrameTx::new(buffer));
            let bytes_sent = response.map(|r| r.bytes_sent()).unwrap_or(0);
            (bytes_sent, response)
        })
    }

    /// Number of received bytes that were not consumed yet.
    fn poll_pending_received_bytes(&mut self) -> usize {
        self.receive_data(|buffer| (0, buffer.len()))
    }
}
