use crate::mstp::{Frame, SimulatedClock, SimulatedSilenceTimer};
use std::sync;
use std::time::Duration;

/// UART character length: start bit, 8 data bits, stop bit
const BITS_PER_OCTET: u32 = 10;

#[derive(Debug)]
struct CapturedTransmission {
    sender: &'static str,
    timestamp: Duration,
    index: usize,
    length: usize,
}

/// A transmission recorded by the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub sender: &'static str,
    /// Bus time at the start of the transmission
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    /// Decode the transmission as an MS/TP frame.
    pub fn frame(&self) -> Option<Frame<'_>> {
        Frame::deserialize(&self.data)
            .and_then(Result::ok)
            .map(|(f, _)| f)
    }
}

#[derive(Debug)]
struct SimulatorBus {
    baudrate: crate::Baudrate,
    transmissions: Vec<CapturedTransmission>,
    stream: Vec<u8>,
    clock: SimulatedClock,
}

impl SimulatorBus {
    pub fn new(baudrate: crate::Baudrate) -> Self {
        Self {
            baudrate,
            transmissions: Vec::new(),
            stream: Vec::new(),
            clock: SimulatedClock::new(),
        }
    }

    fn octets_sent(&self, t: &CapturedTransmission) -> usize {
        let duration = self.clock.now().saturating_sub(t.timestamp);
        let octets = self.baudrate.time_to_bits(duration) / u64::from(BITS_PER_OCTET);
        usize::try_from(octets).unwrap_or(usize::MAX).min(t.length)
    }

    pub fn current_cursor(&self) -> usize {
        match self.transmissions.last() {
            Some(last) => self.stream.len() - last.length + self.octets_sent(last),
            None => 0,
        }
    }

    pub fn pending_bytes(&self, cursor: usize) -> &[u8] {
        &self.stream[cursor.min(self.current_cursor())..self.current_cursor()]
    }

    pub fn is_active(&self) -> Option<&'static str> {
        let last = self.transmissions.last()?;
        if self.octets_sent(last) < last.length {
            Some(last.sender)
        } else {
            None
        }
    }

    pub fn enqueue_transmission(&mut self, name: &'static str, mut data: Vec<u8>) {
        if let Some(active_sender) = self.is_active() {
            panic!(
                "\"{}\" attempted transmission while \"{}\" is still sending!",
                name, active_sender
            );
        }

        // Drop out early if nothing needs to be sent.
        if data.is_empty() {
            return;
        }

        let now = self.clock.now().as_micros();
        match Frame::deserialize(&data) {
            Some(Ok((frame, length))) => {
                if length != data.len() {
                    panic!("Enqueued more than one frame? {data:02x?}");
                }
                log::trace!("{:8} {}: {:?}", now, name, frame);
            }
            _ => {
                log::trace!("{:8} {}: {:02x?}", now, name, data);
            }
        }

        let transmission = CapturedTransmission {
            sender: name,
            timestamp: self.clock.now(),
            index: self.stream.len(),
            length: data.len(),
        };
        self.stream.append(&mut data);
        self.transmissions.push(transmission);
    }

    pub fn print_log(&self) {
        for t in &self.transmissions {
            print!("{:16} {:>12}:", t.timestamp.as_micros(), t.sender);
            for b in &self.stream[t.index..t.index + t.length] {
                print!(" 0x{:02x}", b);
            }
            println!();
        }
    }

    pub fn captured_frames(&self) -> Vec<CapturedFrame> {
        self.transmissions
            .iter()
            .map(|t| CapturedFrame {
                sender: t.sender,
                timestamp: t.timestamp,
                data: self.stream[t.index..t.index + t.length].to_vec(),
            })
            .collect()
    }
}

/// Simulated RS-485 bus for tests
///
/// Available with the `phy-simulator` feature.
///
/// All PHYs created via [`SimulatorPhy::duplicate()`] are connected to the same bus.  Octets
/// become visible to the other PHYs with realistic timing for the configured baudrate, as the
/// simulated bus time is advanced.  Overlapping transmissions cause a panic.
///
/// The bus time also drives silence timers obtained from [`SimulatorPhy::silence_timer()`].
#[derive(Debug)]
pub struct SimulatorPhy {
    bus: sync::Arc<sync::Mutex<SimulatorBus>>,
    cursor: usize,
    name: &'static str,
}

impl SimulatorPhy {
    pub fn new(baudrate: crate::Baudrate, name: &'static str) -> Self {
        Self {
            bus: sync::Arc::new(sync::Mutex::new(SimulatorBus::new(baudrate))),
            cursor: 0,
            name,
        }
    }

    /// Create another PHY connected to the same bus.
    pub fn duplicate(&self, name: &'static str) -> Self {
        Self {
            bus: self.bus.clone(),
            cursor: self.bus.lock().unwrap().current_cursor(),
            name,
        }
    }

    pub fn clock(&self) -> SimulatedClock {
        self.bus.lock().unwrap().clock.clone()
    }

    /// A silence timer running on the simulated bus time.
    pub fn silence_timer(&self) -> SimulatedSilenceTimer {
        self.clock().silence_timer()
    }

    pub fn set_bus_time(&self, time: Duration) {
        self.bus.lock().unwrap().clock.set(time);
    }

    pub fn advance_bus_time(&self, dur: Duration) {
        self.bus.lock().unwrap().clock.advance(dur);
    }

    pub fn bus_time(&self) -> Duration {
        self.bus.lock().unwrap().clock.now()
    }

    pub fn print_bus_log(&self) {
        self.bus.lock().unwrap().print_log();
    }

    /// All transmissions seen on the bus so far.
    pub fn bus_frames(&self) -> Vec<CapturedFrame> {
        self.bus.lock().unwrap().captured_frames()
    }

    /// Decode the next complete frame from the received octets.
    ///
    /// Octets that do not start a valid frame are skipped.
    pub fn receive_frame<F, R>(&mut self, f: F) -> Option<R>
    where
        F: FnOnce(Frame) -> R,
    {
        use crate::phy::MstpPhy;

        self.receive_data(|buffer| match Frame::deserialize(buffer) {
            Some(Ok((frame, length))) => (length, Some(f(frame))),
            Some(Err(_)) => (1, None),
            None => (0, None),
        })
    }

    /// Advance bus time in `timestep` increments until a received frame matches.
    pub fn iter_until_matching<'a, F>(
        &'a mut self,
        timestep: Duration,
        f: F,
    ) -> SimulationIterator<'a, F>
    where
        F: FnMut(Frame) -> bool,
    {
        SimulationIterator {
            timeout: self.bus_time() + Duration::from_secs(10),
            phy: self,
            timestep,
            matcher: f,
        }
    }
}

impl crate::phy::MstpPhy for SimulatorPhy {
    fn poll_transmission(&mut self) -> bool {
        let bus = self.bus.lock().unwrap();
        bus.is_active() == Some(self.name)
    }

    fn transmit_data<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R),
    {
        let mut bus = self.bus.lock().unwrap();

        let mut buffer = vec![0u8; crate::consts::MAX_FRAME_SIZE];
        let (length, res) = f(&mut buffer);
        buffer.truncate(length);

        if length != 0 {
            let unread = bus.current_cursor().saturating_sub(self.cursor);
            if unread != 0 {
                log::debug!("\"{}\" transmits with {unread} unread octets", self.name);
            }
            bus.enqueue_transmission(self.name, buffer);
            // Our own transmission is not received back.
            self.cursor = bus.stream.len();
        }

        res
    }

    fn receive_data<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> (usize, R),
    {
        if self.poll_transmission() {
            panic!(
                "\"{}\" attempted to receive while it was still transmitting!",
                self.name
            );
        }

        let bus = self.bus.lock().unwrap();
        let pending = bus.pending_bytes(self.cursor);

        let (drop, res) = f(pending);
        assert!(
            drop <= pending.len(),
            "\"{}\" attempted to drop more pending bytes than it has!",
            self.name,
        );
        self.cursor += drop;

        res
    }
}

pub struct SimulationIterator<'a, F> {
    phy: &'a mut SimulatorPhy,
    timestep: Duration,
    timeout: Duration,
    matcher: F,
}

impl<'a, F> Iterator for SimulationIterator<'a, F>
where
    F: FnMut(Frame) -> bool,
{
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        use crate::phy::MstpPhy;

        self.phy.advance_bus_time(self.timestep);
        let now = self.phy.bus_time();
        if now >= self.timeout {
            panic!("Timeout while waiting for a certain frame to show up!");
        }
        if !self.phy.poll_transmission() {
            let matcher = &mut self.matcher;
            let is_matching = self.phy.receive_frame(|f| matcher(f)).unwrap_or(false);
            if is_matching {
                return None;
            }
        }
        Some(now)
    }
}
