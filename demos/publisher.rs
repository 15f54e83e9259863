//! Resilient Telemetry Publisher Example
//!
//! Publishes simulated DHT22 readings to `sensors/environmental` every five
//! seconds. Stop the broker while it runs to watch readings being dropped,
//! then start it again to watch the publisher reconnect on its own.
//!
//! Configuration comes from `config/telemetry.*` and `TELEMETRY_*` variables,
//! e.g. `TELEMETRY_BROKER__URL=tcp://192.168.1.20:1883`.

use rand::Rng;
use resilient_telemetry::{Error, HostLink, Publisher, Result, Sample, SensorSource, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Simulated DHT22: drifting values and the odd checksum failure.
struct SimulatedDht22 {
    temperature_c: f64,
    humidity: f64,
}

impl SimulatedDht22 {
    fn new() -> Self {
        Self {
            temperature_c: 21.0,
            humidity: 45.0,
        }
    }
}

impl SensorSource for SimulatedDht22 {
    fn sample(&mut self) -> Result<Sample> {
        let mut rng = rand::rng();

        if rng.random_range(0..20) == 0 {
            return Err(Error::TransientFault("DHT22 checksum mismatch".to_string()));
        }

        self.temperature_c = (self.temperature_c + rng.random::<f64>() - 0.5).clamp(-10.0, 40.0);
        self.humidity = (self.humidity + (rng.random::<f64>() - 0.5) * 2.0).clamp(0.0, 100.0);

        Ok(Sample::new(
            (self.temperature_c * 10.0).round() / 10.0,
            (self.humidity * 10.0).round() / 10.0,
        ))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Resilient Telemetry Publisher Example");
    println!("=====================================\n");

    let shutdown = Arc::new(AtomicBool::new(false));
    let s = shutdown.clone();

    ctrlc::set_handler(move || s.store(true, Ordering::SeqCst))
        .expect("Error setting Ctrl-C handler");

    let settings = Settings::load()?;
    let config = settings.publisher_config()?;

    println!("Device:   {}", config.device_id);
    println!("Location: {}", config.location);
    println!("Broker:   {}", config.endpoint);
    println!("Topic:    {}", config.topic);
    println!("Interval: {:?}\n", config.interval);

    let transport = settings.transport(config.device_id.clone());
    let mut publisher = Publisher::new(config, transport, SimulatedDht22::new(), HostLink)?;

    publisher.run(&shutdown)?;

    let stats = publisher.connection().stats();
    println!("\nFinal statistics:");
    println!("  Published:        {}", stats.published);
    println!("  Publish failures: {}", stats.publish_failures);
    println!("  Reconnects:       {}", stats.reconnects);
    println!("  Connect failures: {}", stats.connect_failures);
    println!("Bye");

    Ok(())
}
