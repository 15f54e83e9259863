//! Resilient Telemetry Subscriber Example
//!
//! Subscribes to `sensors/#` and prints every message as `topic :: payload`.
//! Readings published by the publisher example are decoded and shown with
//! the local receive time. The subscription survives broker restarts.

use resilient_telemetry::{HostLink, Message, Result, Settings, Subscriber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn timestamp() -> String {
    let now = chrono::Local::now();
    now.format("%H:%M:%S%.3f").to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Resilient Telemetry Subscriber Example");
    println!("======================================\n");

    let shutdown = Arc::new(AtomicBool::new(false));
    let s = shutdown.clone();

    ctrlc::set_handler(move || s.store(true, Ordering::SeqCst))
        .expect("Error setting Ctrl-C handler");

    let settings = Settings::load()?;
    let config = settings.subscriber_config()?;
    let client_id = settings.subscriber_client_id();

    println!("My client ID is {}", client_id);
    println!("Broker: {}", config.endpoint);
    for topic in &config.topics {
        println!("Topic:  {}", topic);
    }
    println!();

    let transport = settings.transport(client_id);
    let mut subscriber = Subscriber::new(config, transport, HostLink);

    subscriber.subscribe_configured(|msg: &Message| {
        println!("[{}] {} :: {}", timestamp(), msg.topic, msg.payload_str());
        if let Ok(reading) = msg.parse_reading() {
            println!(
                "    {} in {}: {:.2}F, {:.1}% humidity",
                reading.device_id, reading.location, reading.temperature_f, reading.humidity
            );
        }
        Ok(())
    })?;

    subscriber.run(&shutdown)?;

    let stats = subscriber.connection().stats();
    println!("\nFinal statistics:");
    println!("  Delivered:      {}", stats.delivered);
    println!("  Handler faults: {}", stats.handler_faults);
    println!("  Reconnects:     {}", stats.reconnects);

    Ok(())
}
