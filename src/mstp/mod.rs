//! MS/TP datalink layer
//!
//! The [`MstpStation`] combines the receive state machine with the master or slave node state
//! machine.  Octets flow from the PHY into the receive state machine.  Completed frames are
//! handed to the node state machine, which talks to the upper layer through the
//! [`Datalink`][crate::datalink::Datalink] handle.
pub mod correlate;
pub mod crc;
mod frame;
pub mod handoff;
mod master;
mod parameters;
mod queue;
mod receive;
mod silence;
mod slave;
mod station;
mod statistics;
mod token_ring;

#[cfg(all(test, feature = "phy-simulator"))]
mod tests;

pub use frame::{
    construct_frame, parse_header, Frame, FrameError, FrameHeader, FrameTx, FrameTxResponse,
    FrameType,
};
pub use parameters::{Parameters, ParametersBuilder};
pub use queue::{EnqueueError, OutgoingPdu, PduQueue, PduStorage};
pub use receive::{ReceiveFsm, ReceiveStatistics};
pub use silence::{SilenceTimer, SimulatedClock, SimulatedSilenceTimer, StdSilenceTimer};
pub use station::{MasterState, MstpStation};
pub use statistics::Statistics;
pub use token_ring::TokenRing;
