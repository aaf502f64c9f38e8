#![deny(unused_must_use)]
use crate::consts::{BROADCAST_ADDRESS, MAX_MASTER_ADDRESS};
use crate::datalink::{fill_address, BacnetAddress, Datalink, ReceivedPacket};
use crate::mstp::handoff::{self, FrameConsumer, FrameProducer, InboundFrame};
use crate::mstp::statistics::NodeStatistics;
use crate::mstp::{
    FrameTx, FrameTxResponse, OutgoingPdu, Parameters, ReceiveFsm, SilenceTimer, Statistics,
    TokenRing,
};
use crate::phy::MstpPhy;

/// State of the master node state machine
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MasterState {
    /// Just started or reconfigured, the ring state is reset on the next poll.
    Initialize,
    /// Waiting for a frame or for the token to be considered lost.
    Idle,
    /// Holding the token, sending queued PDUs.
    UseToken,
    /// Holding the token, waiting for the reply to a data-expecting-reply frame.
    WaitForReply,
    /// Done sending, deciding whether to poll for masters or pass the token.
    DoneWithToken,
    /// Token was passed, watching whether the successor uses it.
    PassToken,
    /// The bus fell silent, waiting for this station's slot to generate a new token.
    NoToken,
    /// Holding the token, waiting for an answer to a Poll For Master.
    PollForMaster,
    /// A request from another station was received, waiting for the reply from the upper layer.
    AnswerDataRequest,
}

impl MasterState {
    /// Whether a station in this state holds the token.
    #[inline]
    pub fn has_token(self) -> bool {
        matches!(
            self,
            MasterState::UseToken
                | MasterState::WaitForReply
                | MasterState::DoneWithToken
                | MasterState::PollForMaster
        )
    }
}

/// State of the slave node state machine
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum SlaveState {
    Idle,
    AnswerDataRequest,
}

/// An MS/TP station on one RS-485 bus
///
/// The station runs the receive state machine and either the master or the slave node state
/// machine, depending on its address and the slave-mode setting.  It must be polled regularly
/// with [`MstpStation::poll()`].  Application PDUs are exchanged through the [`Datalink`] handle
/// returned by [`MstpStation::datalink()`].
///
/// # Example
/// ```no_run
/// use bacnet_mstp::{mstp, phy, Baudrate};
///
/// let param = mstp::ParametersBuilder::new(4, Baudrate::B38400)
///     .max_master(16)
///     .build();
/// let mut station = mstp::MstpStation::new(param, mstp::StdSilenceTimer::new());
/// let mut phy = phy::SerialPortPhy::new("/dev/ttyUSB0", Baudrate::B38400).unwrap();
///
/// loop {
///     station.poll(&mut phy);
///     std::thread::sleep(std::time::Duration::from_micros(500));
/// }
/// ```
pub struct MstpStation<T: SilenceTimer> {
    pub(crate) p: Parameters,

    /// Silence timer shared between the receive and the node zone
    pub(crate) timer: T,

    /// Receive zone: frame assembly
    pub(crate) receiver: ReceiveFsm,
    pub(crate) producer: FrameProducer,

    /// Node zone: frames handed over by the receive zone
    pub(crate) consumer: FrameConsumer,
    pub(crate) ring: TokenRing,
    pub(crate) master_state: MasterState,
    pub(crate) slave_state: SlaveState,

    /// Request that is currently being answered
    pub(crate) pending_request: Option<InboundFrame>,

    /// Queue and received-packet slot shared with the upper layer
    pub(crate) datalink: Datalink,

    /// Whether the PHY was still transmitting during the last poll
    transmitting: bool,

    pub(crate) stats: NodeStatistics,
}

impl<T: SilenceTimer> MstpStation<T> {
    pub fn new(param: Parameters, timer: T) -> Self {
        param.debug_assert_consistency();

        let (producer, consumer) = handoff::channel();
        let station = Self {
            timer,
            receiver: ReceiveFsm::new(&param),
            producer,
            consumer,
            ring: TokenRing::new(&param),
            master_state: MasterState::Initialize,
            slave_state: SlaveState::Idle,
            pending_request: None,
            datalink: Datalink::new(param.queue_capacity),
            transmitting: false,
            stats: Default::default(),

            p: param,
        };
        station.log_role();
        station
    }

    fn log_role(&self) {
        let role = if self.p.is_master() {
            "master"
        } else if self.p.is_slave() {
            "slave"
        } else {
            "listen-only station"
        };
        log::info!(
            "MS/TP {role} #{} at {} baud (max_master {}, max_info_frames {})",
            self.p.address,
            self.p.baudrate.to_rate(),
            self.p.max_master,
            self.p.max_info_frames,
        );
    }

    /// Return a reference to the parameters configured for this station.
    #[inline(always)]
    pub fn parameters(&self) -> &Parameters {
        &self.p
    }

    /// Handle for sending and receiving PDUs through this station.
    pub fn datalink(&self) -> Datalink {
        self.datalink.clone()
    }

    #[inline(always)]
    pub fn master_state(&self) -> MasterState {
        self.master_state
    }

    /// Returns `true` while this station holds the token.
    #[inline(always)]
    pub fn has_token(&self) -> bool {
        self.p.is_master() && self.master_state.has_token()
    }

    #[inline(always)]
    pub fn sole_master(&self) -> bool {
        self.ring.sole_master()
    }

    /// Returns `true` once this station has held the token at least once.
    #[inline(always)]
    pub fn is_in_ring(&self) -> bool {
        self.ring.in_ring()
    }

    /// Address of the station the token is passed to.
    #[inline(always)]
    pub fn next_station(&self) -> crate::Address {
        self.ring.next_station()
    }

    /// Iterator over all masters seen on the bus, including this station.
    pub fn iter_known_masters(&self) -> impl Iterator<Item = crate::Address> + '_ {
        self.ring.iter_known_masters()
    }

    pub fn statistics(&self) -> Statistics {
        Statistics::merge(self.stats, self.receiver.statistics())
    }

    /// Address of this station as seen by the upper layer.
    pub fn my_address(&self) -> BacnetAddress {
        BacnetAddress::local(self.p.address)
    }

    #[inline(always)]
    pub fn mac_address(&self) -> crate::Address {
        self.p.address
    }

    /// Change the station address.
    ///
    /// Addresses up to 254 are accepted, others are ignored.  When the new address is a master
    /// address beyond `max_master`, `max_master` is raised to it.  The station restarts with a
    /// fresh ring state.
    pub fn set_mac_address(&mut self, address: crate::Address) {
        if address == BROADCAST_ADDRESS {
            return;
        }
        self.p.address = address;
        if address <= MAX_MASTER_ADDRESS && address > self.p.max_master {
            self.p.max_master = address;
        }
        self.reinitialize();
    }

    #[inline(always)]
    pub fn max_master(&self) -> crate::Address {
        self.p.max_master
    }

    /// Change the highest master address.
    ///
    /// Ignored when above 127 or below the address of this (master) station.
    pub fn set_max_master(&mut self, max_master: crate::Address) {
        if max_master > MAX_MASTER_ADDRESS {
            return;
        }
        if self.p.address <= MAX_MASTER_ADDRESS && self.p.address > max_master {
            return;
        }
        self.p.max_master = max_master;
    }

    #[inline(always)]
    pub fn max_info_frames(&self) -> u8 {
        self.p.max_info_frames
    }

    /// Change the number of frames sent per token.  Zero is ignored.
    pub fn set_max_info_frames(&mut self, max_info_frames: u8) {
        if max_info_frames >= 1 {
            self.p.max_info_frames = max_info_frames;
        }
    }

    #[inline(always)]
    pub fn slave_mode(&self) -> bool {
        self.p.slave_mode
    }

    /// Force slave operation even for a master address.
    pub fn set_slave_mode(&mut self, slave_mode: bool) {
        if self.p.slave_mode != slave_mode {
            self.p.slave_mode = slave_mode;
            self.reinitialize();
        }
    }

    #[inline(always)]
    pub fn baud_rate(&self) -> crate::Baudrate {
        self.p.baudrate
    }

    fn reinitialize(&mut self) {
        self.p.debug_assert_consistency();
        self.receiver.set_this_station(self.p.address);
        self.ring = TokenRing::new(&self.p);
        self.master_state = MasterState::Initialize;
        self.slave_state = SlaveState::Idle;
        self.pending_request = None;
        if self.datalink.queue().abandon_in_flight().is_some() {
            log::debug!("Dropped outstanding request due to reconfiguration");
        }
        self.log_role();
    }

    /// Drive the station.
    ///
    /// Received octets are processed, then the node state machine runs until it has no more
    /// immediate transitions.  Returns `true` when a frame was received, a frame was sent or the
    /// node state changed.
    pub fn poll<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        if phy.poll_transmission() {
            self.transmitting = true;
            return false;
        }
        if core::mem::take(&mut self.transmitting) {
            // Silence starts at the end of our own transmission.
            self.timer.reset();
        }

        let before = (self.master_state, self.slave_state, self.stats.transmit_frames);

        let received = self
            .receiver
            .poll(phy, &self.timer, &mut self.producer);

        if self.p.is_master() {
            while self.master_step(phy) {}
        } else if self.p.is_slave() {
            self.slave_step(phy);
        } else if self.consumer.take().is_some() {
            log::trace!("Ignoring frame, station has no address");
        }

        received || before != (self.master_state, self.slave_state, self.stats.transmit_frames)
    }
}

impl<T: SilenceTimer> MstpStation<T> {
    #[inline]
    pub(crate) fn silence_ms(&self) -> u32 {
        self.timer.elapsed_ms()
    }

    pub(crate) fn transmit<PHY, F>(&mut self, phy: &mut PHY, f: F)
    where
        PHY: MstpPhy,
        F: FnOnce(FrameTx) -> FrameTxResponse,
    {
        let sent = phy
            .transmit_frame(|tx| Some(f(tx)))
            .map(|res| res.bytes_sent())
            .unwrap_or(0);
        if sent == 0 {
            log::debug!("Frame could not be constructed, nothing sent");
            return;
        }
        self.timer.reset();
        self.stats.transmit_frames = self.stats.transmit_frames.wrapping_add(1);
    }

    pub(crate) fn send_token<PHY: MstpPhy>(&mut self, phy: &mut PHY, da: crate::Address) {
        log::trace!("#{} passes the token to #{da}", self.p.address);
        let sa = self.p.address;
        self.transmit(phy, |tx| tx.send_token(da, sa));
    }

    pub(crate) fn send_poll_for_master<PHY: MstpPhy>(&mut self, phy: &mut PHY, da: crate::Address) {
        log::trace!("#{} polls #{da} for master", self.p.address);
        let sa = self.p.address;
        self.transmit(phy, |tx| tx.send_poll_for_master(da, sa));
    }

    pub(crate) fn send_reply_to_poll_for_master<PHY: MstpPhy>(
        &mut self,
        phy: &mut PHY,
        da: crate::Address,
    ) {
        let sa = self.p.address;
        self.transmit(phy, |tx| tx.send_reply_to_poll_for_master(da, sa));
    }

    pub(crate) fn send_reply_postponed<PHY: MstpPhy>(&mut self, phy: &mut PHY, da: crate::Address) {
        log::debug!("No reply available within T_reply_delay, postponing reply to #{da}");
        let sa = self.p.address;
        self.transmit(phy, |tx| tx.send_reply_postponed(da, sa));
    }

    pub(crate) fn send_test_response<PHY: MstpPhy>(
        &mut self,
        phy: &mut PHY,
        da: crate::Address,
        data: &[u8],
    ) {
        let sa = self.p.address;
        self.transmit(phy, |tx| tx.send_test_response(da, sa, data));
    }

    pub(crate) fn send_pdu<PHY: MstpPhy>(&mut self, phy: &mut PHY, pdu: &OutgoingPdu) {
        log::trace!(
            "#{} sends {:?} to #{} ({} octets)",
            self.p.address,
            pdu.frame_type(),
            pdu.destination(),
            pdu.pdu().len()
        );
        let sa = self.p.address;
        self.transmit(phy, |tx| {
            tx.send_frame(pdu.frame_type(), pdu.destination(), sa, pdu.pdu())
        });
        self.stats.transmit_pdus = self.stats.transmit_pdus.wrapping_add(1);
    }

    /// Hand a received PDU to the upper layer.
    pub(crate) fn deliver(&mut self, frame: InboundFrame) {
        let packet = ReceivedPacket {
            address: fill_address(frame.source()),
            pdu: frame.data,
        };
        if self.datalink.deliver(packet) {
            self.stats.receive_pdus = self.stats.receive_pdus.wrapping_add(1);
        } else {
            self.stats.receive_overruns = self.stats.receive_overruns.wrapping_add(1);
            log::debug!(
                "Previous PDU was not fetched yet, dropping PDU from #{}",
                frame.header.source
            );
        }
    }
}

impl<T: SilenceTimer> core::fmt::Debug for MstpStation<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MstpStation")
            .field("parameters", &self.p)
            .field("master_state", &self.master_state)
            .field("slave_state", &self.slave_state)
            .field("ring", &self.ring)
            .finish_non_exhaustive()
    }
}
