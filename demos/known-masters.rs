use bacnet_mstp::{datalink, mstp, phy};

// Bus Parameters
const BUS_DEVICE: &'static str = "/dev/ttyUSB0";
const BAUDRATE: bacnet_mstp::Baudrate = bacnet_mstp::Baudrate::B38400;

/// Unconfirmed Who-Is, global broadcast
const WHO_IS: [u8; 8] = [0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08];

fn main() {
    env_logger::init();

    println!("MS/TP Known Masters:");

    let mut station = mstp::MstpStation::new(
        mstp::ParametersBuilder::new(0x7E, BAUDRATE)
            .max_master(127)
            // USB-RS485 converters can induce large delays at times.
            .usage_timeout_ms(35)
            .build(),
        mstp::StdSilenceTimer::new(),
    );

    let dl = station.datalink();
    std::thread::spawn(move || loop {
        if let Some(packet) = dl.receive(std::time::Duration::from_millis(1000)) {
            println!(
                "PDU from {:?}: {:02X?}",
                packet.address.mstp_mac(),
                packet.pdu
            );
        }
    });

    println!("Connecting to the bus...");
    let mut phy = phy::SerialPortPhy::new(BUS_DEVICE, station.parameters().baudrate)
        .expect("failed opening serial port");

    let mut i = 0u64;
    loop {
        station.poll(&mut phy);

        if i % 10000 == 0 {
            let masters: Vec<_> = station
                .iter_known_masters()
                .map(|addr| addr.to_string())
                .collect();
            println!("Known Masters: {}", masters.join(", "));
            println!("{:?}", station.statistics());

            if station.datalink().queue_empty() {
                station
                    .datalink()
                    .send(&datalink::broadcast_address(), &WHO_IS);
            }
        }

        i += 1;
        std::thread::sleep(std::time::Duration::from_micros(200));
    }
}
