use std::env;
use std::time::Duration;

use fnirsi_dps_psu::connection::{BAUD_RATE_PROPERTY, DEFAULT_BAUD_RATE};
use fnirsi_dps_psu::discovery::Port;
use fnirsi_dps_psu::property::{Properties, PropertyValue};
use fnirsi_dps_psu::{Connector, ConnectorRegistry, Dps150Connector};
use inquire::Select;
use tracing_subscriber::EnvFilter;

// Configuration constants - adjust these for your setup
const OUTPUT_VOLTAGE: f32 = 5.5;
const CURRENT_LIMIT: f32 = 0.1;
const STABILIZATION_DELAY: Duration = Duration::from_millis(1000);
const MEASUREMENTS: usize = 5;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut registry = ConnectorRegistry::new();
    registry.register(std::sync::Arc::new(Dps150Connector::new()));
    let connector = registry
        .get("FNIRSI DPS-150")
        .expect("DPS-150 connector is registered");

    // Get serial port from command line arg or interactive selection
    let port = match env::args().nth(1) {
        Some(path) => Port::serial(path),
        None => {
            let ports = connector.list_ports();
            if ports.is_empty() {
                eprintln!("No DPS-150 found! Pass the serial port path as an argument.");
                std::process::exit(1);
            }
            let labels: Vec<String> = ports
                .iter()
                .map(|port| format!("{} ({})", port.path, port.description))
                .collect();
            let choice = Select::new("Select a power supply:", labels.clone())
                .prompt()
                .expect("Failed to select port");
            let index = labels.iter().position(|label| *label == choice).unwrap_or(0);
            ports[index].clone()
        }
    };

    println!("Using port: {}", port.path);

    let mut properties = Properties::new();
    properties.insert(
        BAUD_RATE_PROPERTY.to_string(),
        PropertyValue::Uint(DEFAULT_BAUD_RATE),
    );
    let psu = connector
        .connect(&port, &properties)
        .expect("Failed to connect");

    println!(
        "Connected to {} (hardware {}, firmware {})",
        psu.model_name().get(),
        psu.hardware_version().get(),
        psu.firmware_version().get()
    );
    println!(
        "Input {:.2}V, limits {:.2}V / {:.2}A",
        psu.input_voltage().get(),
        psu.max_voltage().get(),
        psu.max_current().get()
    );

    psu.voltage_set()
        .set(OUTPUT_VOLTAGE)
        .expect("Failed to set voltage");
    println!("Set output voltage to {OUTPUT_VOLTAGE}V");

    psu.current_set()
        .set(CURRENT_LIMIT)
        .expect("Failed to set current limit");
    println!("Set current limit to {CURRENT_LIMIT}A");

    let readings = psu.output_power().subscribe();
    psu.set_output(true).expect("Failed to enable output");
    println!("Output enabled");

    std::thread::sleep(STABILIZATION_DELAY);

    for _ in 0..MEASUREMENTS {
        match readings.recv_timeout(psu.timeout()) {
            Ok(power) => println!(
                "Measured {:.3}V {:.3}A {:.3}W ({})",
                psu.output_voltage().get(),
                psu.output_current().get(),
                power,
                psu.regulation_mode().get().name()
            ),
            Err(_) => {
                // Not every firmware streams measurements, ask for them.
                let dump = psu.refresh_wait().expect("Failed to read dump");
                println!("Polled {:#?}", dump.measurement);
            }
        }
    }

    println!("\n--- Properties ---");
    for info in psu.properties() {
        let access = if info.readonly { "ro" } else { "rw" };
        println!("{:<18} {access} {}", info.name, info.value);
    }

    psu.set_output(false).expect("Failed to disable output");
    psu.disconnect();
    println!("Disconnected");
}
