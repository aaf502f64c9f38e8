use crate::datalink::{fill_address, Datalink, ReceivedPacket};
use crate::mstp::{
    FrameHeader, FrameType, MasterState, MstpStation, Parameters, ParametersBuilder,
    SimulatedSilenceTimer,
};
use crate::phy;
use crate::phy::MstpPhy;
use std::time::Duration;

/// ReadProperty request, invoke ID 0x12
const READ_PROPERTY: &[u8] = &[
    0x01, 0x04, 0x00, 0x05, 0x12, 0x0C, 0x0C, 0x02, 0x00, 0x00, 0x01, 0x19, 0x4D,
];
/// ComplexAck answering [`READ_PROPERTY`]
const READ_PROPERTY_ACK: &[u8] = &[
    0x01, 0x00, 0x30, 0x12, 0x0C, 0x0C, 0x02, 0x00, 0x00, 0x01, 0x19, 0x4D, 0x3E, 0x44, 0x41,
    0xA0, 0x00, 0x00, 0x3F,
];

type SimStation = MstpStation<SimulatedSilenceTimer>;

fn phy_name(addr: crate::Address) -> &'static str {
    Box::leak(format!("phy#{addr}").into_boxed_str())
}

/// One station under test, with a second PHY on the same bus acting as the other stations
struct MstpUnderTest {
    control_addr: u8,
    timestep: Duration,
    pub phy_control: phy::SimulatorPhy,
    phy_station: phy::SimulatorPhy,
    pub station: SimStation,
}

impl MstpUnderTest {
    pub fn new(addr: crate::Address) -> Self {
        Self::with_params(ParametersBuilder::new(addr, crate::Baudrate::B38400).max_master(2))
    }

    pub fn with_params(builder: &mut ParametersBuilder) -> Self {
        Self::from_params(builder.build())
    }

    pub fn from_params(param: Parameters) -> Self {
        let phy_control = phy::SimulatorPhy::new(param.baudrate, "phy#control");
        let phy_station = phy_control.duplicate("phy#ut");

        crate::test_utils::set_active_addr(param.address);
        let station = MstpStation::new(param, phy_station.silence_timer());

        Self {
            control_addr: 2,
            timestep: Duration::from_micros(100),
            phy_control,
            phy_station,
            station,
        }
    }

    pub fn datalink(&self) -> Datalink {
        self.station.datalink()
    }

    pub fn now(&self) -> Duration {
        self.phy_control.bus_time()
    }

    pub fn do_station_cycle(&mut self) {
        crate::test_utils::set_active_addr(self.station.parameters().address);
        self.station.poll(&mut self.phy_station);
        crate::test_utils::set_active_addr(self.control_addr);
    }

    pub fn do_timestep(&mut self) {
        self.phy_control.advance_bus_time(self.timestep);
        crate::test_utils::set_log_timestamp(self.phy_control.bus_time());
        self.do_station_cycle();
    }

    pub fn run_for(&mut self, time: Duration) {
        let end = self.now() + time;
        while self.now() < end {
            self.do_timestep();
        }
    }

    /// Wait for the next frame the station under test sends.
    pub fn wait_next_frame(&mut self) -> (Duration, FrameHeader, Vec<u8>) {
        let start = self.phy_control.bus_time();
        let addr = self.station.parameters().address;
        let mut res = None;
        for now in self.phy_control.iter_until_matching(self.timestep, |f| {
            res = Some((f.header, f.data.to_vec()));
            true
        }) {
            crate::test_utils::set_log_timestamp(now);
            crate::test_utils::set_active_addr(addr);
            self.station.poll(&mut self.phy_station);
            crate::test_utils::set_active_addr(self.control_addr);
        }
        let (header, data) = res.unwrap();
        (self.phy_control.bus_time() - start, header, data)
    }

    #[track_caller]
    pub fn assert_next_frame(
        &mut self,
        frame_type: FrameType,
        destination: crate::Address,
        data: &[u8],
    ) -> Duration {
        let (time, header, received) = self.wait_next_frame();
        assert_eq!(
            (header.frame_type, header.destination, header.source),
            (frame_type, destination, self.station.parameters().address)
        );
        assert_eq!(received, data);
        time
    }

    pub fn transmit(
        &mut self,
        frame_type: FrameType,
        destination: crate::Address,
        source: crate::Address,
        data: &[u8],
    ) {
        self.phy_control
            .transmit_frame(|tx| Some(tx.send_frame(frame_type, destination, source, data)));
        self.wait_transmission();
    }

    pub fn wait_transmission(&mut self) {
        while self.phy_control.poll_transmission() {
            self.do_timestep();
        }
    }

    pub fn assert_idle_time(&mut self, time: Duration) {
        let timeout = self.now() + time;
        while self.now() < timeout {
            self.do_timestep();
            if self.phy_control.poll_pending_received_bytes() != 0 {
                panic!("Idle time assertion failed!");
            }
        }
    }

    /// Bring the station into a ring with the control station as its successor.
    ///
    /// Afterwards the control station holds the token.
    pub fn prepare_two_station_ring(&mut self) {
        let ts = self.station.parameters().address;
        let control = self.control_addr;

        self.transmit(FrameType::Token, ts, control, &[]);
        self.assert_next_frame(FrameType::PollForMaster, control, &[]);
        self.transmit(FrameType::ReplyToPollForMaster, ts, control, &[]);
        self.assert_next_frame(FrameType::Token, control, &[]);
        assert_eq!(self.station.next_station(), control);
        assert_eq!(self.station.master_state(), MasterState::PassToken);
    }
}

/// Several stations on one simulated bus
struct SimulatedBus {
    timestep: Duration,
    phy: phy::SimulatorPhy,
    stations: Vec<(SimStation, phy::SimulatorPhy)>,
    running: Vec<bool>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            timestep: Duration::from_micros(100),
            phy: phy::SimulatorPhy::new(crate::Baudrate::B38400, "phy#monitor"),
            stations: Vec::new(),
            running: Vec::new(),
        }
    }

    pub fn add_station(&mut self, builder: &mut ParametersBuilder) -> usize {
        let param = builder.build();
        let phy = self.phy.duplicate(phy_name(param.address));
        let station = MstpStation::new(param, phy.silence_timer());
        self.stations.push((station, phy));
        self.running.push(true);
        self.stations.len() - 1
    }

    pub fn station(&self, index: usize) -> &SimStation {
        &self.stations[index].0
    }

    pub fn stop(&mut self, index: usize) {
        self.running[index] = false;
    }

    pub fn do_timestep(&mut self) {
        self.phy.advance_bus_time(self.timestep);
        crate::test_utils::set_log_timestamp(self.phy.bus_time());
        for ((station, phy), running) in self.stations.iter_mut().zip(self.running.iter()) {
            if *running {
                crate::test_utils::set_active_addr(station.parameters().address);
                station.poll(phy);
            }
        }
    }

    /// Run until `f` returns true, panicking after `timeout`.
    pub fn run_until<F: FnMut(&Self) -> bool>(&mut self, timeout: Duration, mut f: F) {
        let end = self.phy.bus_time() + timeout;
        while !f(self) {
            if self.phy.bus_time() >= end {
                self.phy.print_bus_log();
                panic!("Timeout while waiting for bus condition");
            }
            self.do_timestep();
        }
    }

    pub fn run_for(&mut self, time: Duration) {
        let end = self.phy.bus_time() + time;
        while self.phy.bus_time() < end {
            self.do_timestep();
        }
    }

    pub fn frames(&self) -> Vec<(FrameHeader, Vec<u8>)> {
        self.phy
            .bus_frames()
            .iter()
            .filter_map(|c| c.frame().map(|f| (f.header, f.data.to_vec())))
            .collect()
    }
}

fn master(addr: crate::Address, max_master: crate::Address) -> ParametersBuilder {
    let mut builder = ParametersBuilder::new(addr, crate::Baudrate::B38400);
    builder.max_master(max_master);
    builder
}

/// Ensure proper token generation timeout on a silent bus.
#[rstest::rstest]
fn test_token_generation_timeout(#[values(0, 1, 7, 14)] addr: u8) {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::with_params(&mut master(addr, 16));

    let (time, header, _) = ut.wait_next_frame();
    assert_eq!(header.frame_type, FrameType::PollForMaster);
    assert_eq!(header.source, addr);
    assert_eq!(header.destination, addr + 1);

    let p = ut.station.parameters().clone();
    let timestamp = ut.phy_control.bus_frames()[0].timestamp;
    let expected = Duration::from_millis(u64::from(p.token_generation_timeout_ms()));
    let expected_max = expected + Duration::from_millis(u64::from(p.slot_ms));

    log::info!("Measured token generation: {}us", timestamp.as_micros());
    assert!(timestamp >= expected);
    assert!(timestamp < expected_max);
    assert!(time >= expected);
    assert_eq!(ut.station.statistics().lost_tokens, 1);
}

/// Slot timing far beyond anything sensible must not overflow the token generation timeout.
#[test]
fn test_huge_slot_time_waits() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::from_params(Parameters {
        address: 127,
        max_master: 127,
        slot_ms: u32::MAX / 4,
        ..Default::default()
    });

    ut.run_for(Duration::from_millis(600));
    assert_eq!(ut.station.master_state(), MasterState::NoToken);
    assert_eq!(ut.station.statistics().lost_tokens, 1);
    assert!(ut.phy_control.bus_frames().is_empty());
}

/// A lone master polls all addresses and then keeps the token for itself.
#[test]
fn test_sole_master() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::with_params(&mut master(3, 5));

    for poll in [4, 5, 0, 1, 2] {
        let time = ut.assert_next_frame(FrameType::PollForMaster, poll, &[]);
        if poll != 4 {
            // T_usage_timeout passed without answer
            assert!(time > Duration::from_millis(20));
            assert!(time < Duration::from_millis(25));
        }
    }
    ut.run_for(Duration::from_millis(25));
    assert!(ut.station.sole_master());
    assert!(ut.station.is_in_ring());

    // A sole master sends queued data without passing the token.  Maintenance polls may come
    // first.
    let dl = ut.datalink();
    assert_eq!(dl.send(&fill_address(9), &[0x01, 0x00, 0x10, 0x08]), 4);
    loop {
        let (_, header, data) = ut.wait_next_frame();
        if header.frame_type == FrameType::PollForMaster {
            continue;
        }
        assert_eq!(header.frame_type, FrameType::DataNotExpectingReply);
        assert_eq!(header.destination, 9);
        assert_eq!(data, &[0x01, 0x00, 0x10, 0x08]);
        break;
    }
    assert!(dl.queue_empty());
    assert!(ut.station.sole_master());
}

/// Ensure that the station answers a Poll For Master.
#[test]
fn test_reply_to_poll_for_master() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);

    ut.do_timestep();
    ut.transmit(FrameType::PollForMaster, 1, 2, &[]);
    // Includes the 2ms the frame itself takes on the wire
    let time = ut.assert_next_frame(FrameType::ReplyToPollForMaster, 2, &[]);
    assert!(time < Duration::from_millis(3));
    assert_eq!(ut.station.iter_known_masters().collect::<Vec<_>>(), vec![1, 2]);

    // Polls for other stations are ignored.
    ut.transmit(FrameType::PollForMaster, 0, 2, &[]);
    ut.assert_idle_time(Duration::from_millis(50));
}

#[test]
fn test_test_request() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);

    ut.do_timestep();
    ut.transmit(FrameType::TestRequest, 1, 2, &[0xde, 0xad, 0xbe, 0xef]);
    ut.assert_next_frame(FrameType::TestResponse, 2, &[0xde, 0xad, 0xbe, 0xef]);
}

/// A station holding the token sends its queued frame and then passes the token.
#[test]
fn test_use_token_then_pass() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    ut.prepare_two_station_ring();

    let dl = ut.datalink();
    assert_eq!(dl.send(&fill_address(2), &[0x01, 0x02]), 2);

    ut.transmit(FrameType::Token, 1, 2, &[]);
    ut.assert_next_frame(FrameType::DataNotExpectingReply, 2, &[0x01, 0x02]);
    ut.assert_next_frame(FrameType::Token, 2, &[]);
    assert!(dl.queue_empty());

    let frames = ut.phy_control.bus_frames();
    let data_frame = frames
        .iter()
        .find(|c| c.frame().map(|f| f.header.frame_type) == Some(FrameType::DataNotExpectingReply))
        .unwrap();
    assert_eq!(
        data_frame.data,
        &[0x55, 0xFF, 0x06, 0x02, 0x01, 0x00, 0x02, 0x9D, 0x01, 0x02, 0x8D, 0x35]
    );
    assert_eq!(ut.station.statistics().transmit_pdus, 1);
}

/// With an empty queue, the token is passed on right away.
#[test]
fn test_empty_queue_passes_token() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    ut.prepare_two_station_ring();

    ut.transmit(FrameType::Token, 1, 2, &[]);
    let time = ut.assert_next_frame(FrameType::Token, 2, &[]);
    assert!(time < Duration::from_millis(3));
}

#[test]
fn test_token_pass_retry_and_new_successor() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    ut.prepare_two_station_ring();

    // The control station never uses the token.
    let time = ut.assert_next_frame(FrameType::Token, 2, &[]);
    assert!(time > Duration::from_millis(20));
    // Retries exhausted, search for a new successor
    ut.assert_next_frame(FrameType::PollForMaster, 0, &[]);
    ut.run_for(Duration::from_millis(25));
    assert!(ut.station.sole_master());
    assert_eq!(ut.station.next_station(), 1);
}

#[test]
fn test_lost_token() {
    crate::test_utils::prepare_test_logger_with_warnings(vec!["Token lost! Generating a new one."]);
    let mut ut = MstpUnderTest::new(1);
    ut.prepare_two_station_ring();

    // The control station uses the token and then falls silent.
    ut.transmit(FrameType::DataNotExpectingReply, 5, 2, &[0x01, 0x00, 0x10, 0x08]);
    ut.run_for(Duration::from_millis(2));
    assert_eq!(ut.station.master_state(), MasterState::Idle);

    let (time, header, _) = ut.wait_next_frame();
    assert_eq!(header.frame_type, FrameType::PollForMaster);
    assert_eq!(header.destination, 2);
    assert!(time >= Duration::from_millis(508));
    assert!(time < Duration::from_millis(522));
    assert_eq!(ut.station.statistics().lost_tokens, 1);
}

#[test]
fn test_answer_data_request() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    let dl = ut.datalink();
    ut.do_timestep();

    ut.transmit(FrameType::DataExpectingReply, 1, 2, READ_PROPERTY);
    ut.do_timestep();
    let request = dl.receive(Duration::ZERO).unwrap();
    assert_eq!(request.address, fill_address(2));
    assert_eq!(request.pdu, READ_PROPERTY);
    assert_eq!(ut.station.master_state(), MasterState::AnswerDataRequest);

    // Unrelated PDU is queued first and must stay in the queue
    assert_eq!(dl.send(&fill_address(7), &[0x01, 0x00, 0x10, 0x08]), 4);
    assert_eq!(dl.send(&request.address, READ_PROPERTY_ACK), READ_PROPERTY_ACK.len());

    let time = ut.assert_next_frame(FrameType::DataNotExpectingReply, 2, READ_PROPERTY_ACK);
    assert!(time < Duration::from_millis(10));
    assert_eq!(ut.station.master_state(), MasterState::Idle);
    assert!(!dl.queue_empty());
}

#[test]
fn test_reply_postponed() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    ut.do_timestep();

    ut.transmit(FrameType::DataExpectingReply, 1, 2, READ_PROPERTY);
    let time = ut.assert_next_frame(FrameType::ReplyPostponed, 2, &[]);
    assert!(time > Duration::from_millis(250));
    assert!(time < Duration::from_millis(255));
    assert_eq!(ut.station.master_state(), MasterState::Idle);
}

#[test]
fn test_reply_timeout() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    ut.prepare_two_station_ring();

    let dl = ut.datalink();
    assert_eq!(dl.send(&fill_address(2), READ_PROPERTY), READ_PROPERTY.len());
    ut.transmit(FrameType::Token, 1, 2, &[]);
    ut.assert_next_frame(FrameType::DataExpectingReply, 2, READ_PROPERTY);
    assert_eq!(ut.station.master_state(), MasterState::WaitForReply);

    let time = ut.assert_next_frame(FrameType::Token, 2, &[]);
    assert!(time >= Duration::from_millis(255));
    assert!(dl.queue_empty());
}

#[test]
fn test_reply_postponed_ends_wait() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    ut.prepare_two_station_ring();

    let dl = ut.datalink();
    dl.send(&fill_address(2), READ_PROPERTY);
    ut.transmit(FrameType::Token, 1, 2, &[]);
    ut.assert_next_frame(FrameType::DataExpectingReply, 2, READ_PROPERTY);

    ut.transmit(FrameType::ReplyPostponed, 1, 2, &[]);
    let time = ut.assert_next_frame(FrameType::Token, 2, &[]);
    assert!(time < Duration::from_millis(3));
    assert!(dl.queue_empty());
    assert_eq!(dl.receive(Duration::ZERO), None);
}

/// Two masters form a ring and pass the token back and forth.
#[test]
fn test_two_masters_ring() {
    crate::test_utils::prepare_test_logger();
    let mut bus = SimulatedBus::new();
    let a = bus.add_station(&mut master(1, 2));
    let b = bus.add_station(&mut master(2, 2));

    bus.run_until(Duration::from_secs(2), |bus| {
        bus.station(a).next_station() == 2 && bus.station(b).next_station() == 1
    });
    bus.run_for(Duration::from_millis(100));

    let tokens = bus
        .frames()
        .iter()
        .filter(|(h, _)| h.frame_type == FrameType::Token)
        .count();
    assert!(tokens > 20, "token is not circulating");
    assert!(!bus.station(a).sole_master());
    assert!(!bus.station(b).sole_master());
    assert_eq!(bus.station(a).iter_known_masters().collect::<Vec<_>>(), vec![1, 2]);
}

/// A confirmed request travels from one master to another, the reply comes back.
#[test]
fn test_data_expecting_reply_roundtrip() {
    crate::test_utils::prepare_test_logger();
    let mut bus = SimulatedBus::new();
    let a = bus.add_station(&mut master(1, 2));
    let b = bus.add_station(&mut master(2, 2));
    let dl_a = bus.station(a).datalink();
    let dl_b = bus.station(b).datalink();

    bus.run_until(Duration::from_secs(2), |bus| {
        bus.station(a).next_station() == 2 && bus.station(b).next_station() == 1
    });

    assert_eq!(dl_a.send(&fill_address(2), READ_PROPERTY), READ_PROPERTY.len());

    let mut reply: Option<ReceivedPacket> = None;
    bus.run_until(Duration::from_secs(1), |_| {
        if let Some(request) = dl_b.receive(Duration::ZERO) {
            assert_eq!(request.address, fill_address(1));
            assert_eq!(request.pdu, READ_PROPERTY);
            assert_eq!(dl_b.send(&request.address, READ_PROPERTY_ACK), READ_PROPERTY_ACK.len());
        }
        reply = dl_a.receive(Duration::ZERO);
        reply.is_some()
    });

    let reply = reply.unwrap();
    assert_eq!(reply.address, fill_address(2));
    assert_eq!(reply.pdu, READ_PROPERTY_ACK);
    assert!(dl_a.queue_empty());
    assert!(dl_b.queue_empty());

    let frames = bus.frames();
    let request_index = frames
        .iter()
        .position(|(h, _)| h.frame_type == FrameType::DataExpectingReply)
        .unwrap();
    let (reply_header, _) = &frames[request_index + 1];
    assert_eq!(reply_header.frame_type, FrameType::DataNotExpectingReply);
    assert_eq!((reply_header.source, reply_header.destination), (2, 1));

    let stats = bus.station(a).statistics();
    assert_eq!(stats.transmit_pdus, 1);
    assert_eq!(stats.receive_pdus, 1);
    assert_eq!(stats.receive_invalid_frames, 0);
}

/// A master talks to a slave that answers its requests.
#[test]
fn test_slave_answers_request() {
    crate::test_utils::prepare_test_logger();
    let mut bus = SimulatedBus::new();
    let a = bus.add_station(&mut master(1, 2));
    let s = bus.add_station(&mut ParametersBuilder::new(130, crate::Baudrate::B38400));
    let dl_a = bus.station(a).datalink();
    let dl_s = bus.station(s).datalink();

    bus.run_until(Duration::from_secs(2), |bus| bus.station(a).sole_master());
    assert_eq!(dl_a.send(&fill_address(130), READ_PROPERTY), READ_PROPERTY.len());

    let mut reply = None;
    bus.run_until(Duration::from_secs(1), |_| {
        if let Some(request) = dl_s.receive(Duration::ZERO) {
            dl_s.send(&request.address, READ_PROPERTY_ACK);
        }
        reply = dl_a.receive(Duration::ZERO);
        reply.is_some()
    });
    assert_eq!(reply.unwrap().pdu, READ_PROPERTY_ACK);

    // The slave never transmitted anything but the reply.
    let from_slave: Vec<_> = bus
        .frames()
        .into_iter()
        .filter(|(h, _)| h.source == 130)
        .collect();
    assert_eq!(from_slave.len(), 1);
    assert_eq!(from_slave[0].0.frame_type, FrameType::DataNotExpectingReply);
    assert_eq!(bus.station(s).iter_known_masters().count(), 0);
}

/// A slave that cannot answer in time stays silent.
#[test]
fn test_slave_does_not_postpone() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::with_params(
        ParametersBuilder::new(5, crate::Baudrate::B38400).slave_mode(true),
    );
    ut.do_timestep();

    ut.transmit(FrameType::DataExpectingReply, 5, 2, READ_PROPERTY);
    ut.assert_idle_time(Duration::from_millis(600));
    assert_eq!(ut.datalink().receive(Duration::ZERO).unwrap().pdu, READ_PROPERTY);

    // Slaves never take part in token passing.
    ut.transmit(FrameType::PollForMaster, 5, 2, &[]);
    ut.transmit(FrameType::Token, 5, 2, &[]);
    ut.assert_idle_time(Duration::from_millis(100));

    ut.transmit(FrameType::TestRequest, 5, 2, &[0x42]);
    ut.assert_next_frame(FrameType::TestResponse, 2, &[0x42]);
}

/// Corrupted frames are counted but never delivered.
#[test]
fn test_invalid_frames_dropped() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    let dl = ut.datalink();
    ut.do_timestep();

    let mut buffer = [0u8; 32];
    let length = crate::mstp::construct_frame(
        &mut buffer,
        FrameType::DataNotExpectingReply,
        1,
        2,
        &[0x01, 0x00, 0x10, 0x08],
    );
    buffer[10] ^= 0x01;
    ut.phy_control.transmit_data(|tx| {
        tx[..length].copy_from_slice(&buffer[..length]);
        (length, ())
    });
    ut.wait_transmission();
    ut.run_for(Duration::from_millis(5));

    assert_eq!(dl.receive(Duration::ZERO), None);
    assert_eq!(ut.station.statistics().receive_invalid_frames, 1);
    assert_eq!(ut.station.statistics().receive_pdus, 0);
}

/// Broadcast data is delivered, but never answered.
#[test]
fn test_broadcast_delivered() {
    crate::test_utils::prepare_test_logger();
    let mut ut = MstpUnderTest::new(1);
    let dl = ut.datalink();
    ut.do_timestep();

    ut.transmit(FrameType::DataExpectingReply, 255, 2, READ_PROPERTY);
    ut.do_timestep();
    assert_eq!(dl.receive(Duration::ZERO).unwrap().pdu, READ_PROPERTY);
    assert_eq!(ut.station.master_state(), MasterState::Idle);

    // Second PDU while the first one was not fetched
    ut.transmit(FrameType::DataNotExpectingReply, 255, 2, &[0x01, 0x00]);
    ut.transmit(FrameType::DataNotExpectingReply, 255, 2, &[0x01, 0x01]);
    ut.do_timestep();
    assert_eq!(dl.receive(Duration::ZERO).unwrap().pdu, &[0x01, 0x00]);
    assert_eq!(ut.station.statistics().receive_overruns, 1);
}

/// When the only other master vanishes, the remaining one ends up as sole master.
#[test]
fn test_ring_member_disappears() {
    crate::test_utils::prepare_test_logger_with_warnings(vec!["Token lost! Generating a new one."]);
    let mut bus = SimulatedBus::new();
    let a = bus.add_station(&mut master(1, 2));
    let b = bus.add_station(&mut master(2, 2));

    bus.run_until(Duration::from_secs(2), |bus| {
        bus.station(a).next_station() == 2 && bus.station(b).next_station() == 1
    });
    bus.run_for(Duration::from_millis(37));
    bus.stop(b);

    bus.run_until(Duration::from_secs(2), |bus| bus.station(a).sole_master());
    assert_eq!(bus.station(a).next_station(), 1);
    assert!(bus.station(a).is_in_ring());
}
