use ftdi_iostream::{
    find_cables, parse_product_id, Direction, FlowControl, Identity, IoStream, Parity, StopBits,
    TransportConfig,
};

fn main() -> Result<(), ftdi_iostream::Status> {
    env_logger::init();

    // List attached cables
    let cables = find_cables();
    if cables.is_empty() {
        eprintln!("No FTDI cables found.");
        std::process::exit(1);
    }
    for cable in &cables {
        println!(
            "Found: {} {:04x}:{:04x} ({})",
            cable.port_name, cable.identity.vendor_id, cable.identity.product_id, cable.identity.label
        );
    }

    let mut config = TransportConfig::default();
    if let Some(pid) = std::env::var("FTDI_IOSTREAM_PID")
        .ok()
        .and_then(|pid| parse_product_id(&pid))
    {
        config = config.with_candidates(vec![Identity::ftdi(pid, "FTDI_IOSTREAM_PID")]);
    }

    let mut stream = IoStream::open_ftdi(&config)?;

    // Line setup
    stream.configure(9600, 8, Parity::None, StopBits::One, FlowControl::None)?;
    stream.set_timeout(1000)?;
    println!("\nConfigured 9600 8N1");

    // Power the interface from the control lines
    stream.set_dtr(true)?;
    stream.set_rts(false)?;
    stream.sleep(100)?;

    stream.purge(Direction::All)?;
    println!("Pending input: {}", stream.get_available()?);

    stream.close()?;
    println!("Closed.");
    Ok(())
}
