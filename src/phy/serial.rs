use std::borrow::Cow;
use std::io;

#[derive(Debug)]
enum PhyData {
    Rx {
        buffer: Vec<u8>,
        length: usize,
    },
    Tx {
        buffer: Vec<u8>,
        length: usize,
        cursor: usize,
    },
}

impl PhyData {
    fn make_rx(&mut self) {
        if let PhyData::Tx { buffer, .. } = self {
            let buffer = std::mem::take(buffer);
            *self = PhyData::Rx { buffer, length: 0 };
        }
    }
}

/// Platform-independent PHY implementation for serial port devices
///
/// Available with the `phy-serial` feature.
///
/// This PHY implementation is mainly meant for use with USB-RS485 converters, for applications
/// running within a general purpose operating system.  The port is opened with 8 data bits, no
/// parity and one stop bit, as MS/TP requires.
///
/// Between USB, the converter device, and the OS, delays are introduced into the communication
/// path.  Keep them in mind when tuning timing parameters:
///
/// - Particularly FT232-based devices come with a 16ms latency by default, unless explicitly
///   configured for low-latency.  On Linux, low-latency mode is enabled automatically.
/// - Poll the station at least every millisecond.  T<sub>usage_timeout</sub> is only 20ms and
///   replies to Poll For Master must go out well within it.
/// - When other stations on the bus are slow to answer, raise T<sub>usage_timeout</sub> towards
///   35ms using [`ParametersBuilder::usage_timeout_ms()`][crate::mstp::ParametersBuilder::usage_timeout_ms].
///
/// # Example
/// ```no_run
/// use bacnet_mstp::{mstp, phy, Baudrate};
///
/// let mut station = mstp::MstpStation::new(
///     mstp::ParametersBuilder::new(0x02, Baudrate::B38400)
///         .usage_timeout_ms(30)
///         .build(),
///     mstp::StdSilenceTimer::new(),
/// );
///
/// let mut phy = phy::SerialPortPhy::new("/dev/ttyUSB0", station.parameters().baudrate)
///     .expect("failed opening serial port");
/// loop {
///     station.poll(&mut phy);
///     std::thread::sleep(std::time::Duration::from_micros(200));
/// }
/// ```
pub struct SerialPortPhy {
    port: Box<dyn serialport::SerialPort>,
    data: PhyData,
}

impl SerialPortPhy {
    pub fn new<'a, P: Into<Cow<'a, str>>>(
        serial_port: P,
        baudrate: crate::Baudrate,
    ) -> serialport::Result<Self> {
        Self::new_inner(serial_port.into(), baudrate)
    }

    fn new_inner(serial_port: Cow<'_, str>, baudrate: crate::Baudrate) -> serialport::Result<Self> {
        use serialport::SerialPort;

        // All MS/TP baudrates fit into u32.
        let rate = baudrate.to_rate() as u32;

        #[allow(unused_mut)]
        let mut port = serialport::new(serial_port, rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .open_native()?;

        let configured = port.baud_rate()?;
        if configured != rate {
            return Err(serialport::Error::new(
                serialport::ErrorKind::InvalidInput,
                format!("baudrate not configured correctly ({configured} instead of {rate})"),
            ));
        }

        #[cfg(target_os = "linux")]
        if let Err(e) = serialport_low_latency::enable_low_latency(&mut port) {
            log::warn!("Could not enable low-latency mode: {e:?}");
        }

        Ok(Self {
            port: Box::new(port),
            data: PhyData::Rx {
                buffer: vec![0u8; crate::consts::MAX_FRAME_SIZE],
                length: 0,
            },
        })
    }

    fn write(port: &mut dyn serialport::SerialPort, buffer: &[u8]) -> usize {
        match port.write(buffer) {
            Ok(written) => written,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                log::warn!("Serial port write failed: {e}");
                0
            }
        }
    }

    fn output_queue(&mut self) -> usize {
        match self.port.bytes_to_write() {
            Ok(queued) => queued as usize,
            Err(e) => {
                log::warn!("Could not query serial port output queue: {e}");
                0
            }
        }
    }

    fn read(port: &mut dyn serialport::SerialPort, buffer: &mut [u8]) -> usize {
        if buffer.is_empty() {
            return 0;
        }
        match port.bytes_to_read() {
            Ok(0) => 0,
            Ok(_) => match port.read(buffer) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
                Err(e) => {
                    log::warn!("Serial port read failed: {e}");
                    0
                }
            },
            Err(e) => {
                log::warn!("Could not query serial port input queue: {e}");
                0
            }
        }
    }
}

impl crate::phy::MstpPhy for SerialPortPhy {
    fn poll_transmission(&mut self) -> bool {
        if let PhyData::Tx {
            buffer,
            length,
            cursor,
        } = &mut self.data
        {
            if length != cursor {
                // Need to submit more data.
                let written = Self::write(&mut *self.port, &buffer[*cursor..*length]);
                debug_assert!(written <= *length - *cursor);
                *cursor += written;
                true
            } else if self.output_queue() == 0 {
                // All data was sent.
                self.data.make_rx();
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    fn transmit_data<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R),
    {
        match &mut self.data {
            PhyData::Tx { .. } => panic!("transmit_data() while already transmitting!"),
            PhyData::Rx {
                buffer,
                length: receive_length,
            } => {
                if *receive_length != 0 {
                    log::warn!(
                        "{} bytes in the receive buffer and we go into transmission?",
                        receive_length
                    );
                    log::debug!("Receive buffer content: {:02X?}", &buffer[..*receive_length]);
                }
                let (length, res) = f(&mut buffer[..]);
                if length == 0 {
                    return res;
                }
                let cursor = Self::write(&mut *self.port, &buffer[..length]);
                debug_assert!(cursor <= length);
                let buffer = std::mem::take(buffer);
                self.data = PhyData::Tx {
                    buffer,
                    length,
                    cursor,
                };
                res
            }
        }
    }

    fn receive_data<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> (usize, R),
    {
        match &mut self.data {
            PhyData::Tx { .. } => panic!("receive_data() while transmitting!"),
            PhyData::Rx { buffer, length } => {
                *length += Self::read(&mut *self.port, &mut buffer[*length..]);
                debug_assert!(*length <= buffer.len());
                let (drop, res) = f(&buffer[..*length]);
                match drop {
                    0 => (),
                    d if d == *length => *length = 0,
                    d => {
                        assert!(d < *length);
                        buffer.copy_within(d..*length, 0);
                        *length -= d;
                    }
                }
                res
            }
        }
    }
}
