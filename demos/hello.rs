//! Hello MQTT Example
//!
//! Connects once and publishes `Hello MQTT!` to `sensors/hello`.

use resilient_telemetry::{ensure_link, BrokerConnection, HostLink, QoS, Result, Settings};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load()?;
    let config = settings.publisher_config()?;

    let mut link = HostLink;
    ensure_link(&mut link, &config.link)?;

    println!("Connecting to {}...", config.endpoint);
    let mut connection = BrokerConnection::new(settings.transport(config.device_id.clone()));
    connection.connect(&config.endpoint, &config.credentials)?;

    connection.publish("sensors/hello", b"Hello MQTT!", QoS::AtMostOnce)?;
    println!("[OK] Published to sensors/hello");

    connection.disconnect()?;
    println!("[OK] Disconnected");
    Ok(())
}
