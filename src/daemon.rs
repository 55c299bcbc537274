use anyhow::{Context, Result};
use evtvbms_lib::engine::{AverageWindow, MeterPeriod, MetricsEngine, PackConfig, Value};
use evtvbms_lib::udp::UdpListener;
use log::{debug, error, info};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::{commandline, mqtt};

/// Typed fan-out for metric updates, keyed by device name. Every publish
/// carries the full current mapping, so a dropped update is harmless and
/// repeated delivery is idempotent for a given snapshot.
pub trait MetricsSink {
    fn publish(&mut self, device: &str, values: &BTreeMap<String, Value>) -> Result<()>;
}

struct ConsoleSink;

impl MetricsSink for ConsoleSink {
    fn publish(&mut self, device: &str, values: &BTreeMap<String, Value>) -> Result<()> {
        println!(
            "--- {} at {} ---",
            device,
            chrono::Local::now().to_rfc3339()
        );
        for (name, value) in values {
            println!("{name}: {value}");
        }
        println!("--------------------------");
        Ok(())
    }
}

struct MqttSink {
    publisher: mqtt::MqttPublisher,
    format: commandline::MqttFormat,
}

impl MetricsSink for MqttSink {
    fn publish(&mut self, device: &str, values: &BTreeMap<String, Value>) -> Result<()> {
        match self.format {
            commandline::MqttFormat::Json => {
                let mut payload = serde_json::Map::new();
                payload.insert(
                    "timestamp".to_string(),
                    json!(chrono::Utc::now().to_rfc3339()),
                );
                payload.insert("device".to_string(), json!(device));
                for (name, value) in values {
                    payload.insert(name.clone(), serde_json::to_value(value)?);
                }
                let json_payload = serde_json::to_string(&payload)?;
                let topic = format!("{}/{device}", self.publisher.topic());
                self.publisher.publish(&topic, &json_payload)?;
            }
            commandline::MqttFormat::Simple => {
                let base_topic = self.publisher.topic().to_string();
                for (name, value) in values {
                    let topic = format!("{base_topic}/{device}/{name}");
                    self.publisher.publish(&topic, &value.to_string())?;
                }
            }
        }
        Ok(())
    }
}

/// One scheduled engine tick: a rolling-average sample or a periodic-counter
/// boundary.
enum TickKind {
    Average(String),
    Meter(MeterPeriod),
}

struct Tick {
    due: Instant,
    every: Duration,
    kind: TickKind,
}

fn build_sink(output: commandline::DaemonOutput) -> Result<Box<dyn MetricsSink>> {
    match output {
        commandline::DaemonOutput::Console => Ok(Box::new(ConsoleSink)),
        commandline::DaemonOutput::Mqtt {
            config_file,
            format,
        } => {
            let config = mqtt::MqttConfig::load(&config_file)
                .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
            info!("Successfully loaded MQTT config from {config_file}: {config:?}");
            let publisher = mqtt::MqttPublisher::new(config)
                .with_context(|| "Failed to create MQTT publisher")?;
            info!("MQTT Publisher created successfully.");
            Ok(Box::new(MqttSink { publisher, format }))
        }
    }
}

fn build_schedule(windows: &[AverageWindow], start: Instant) -> Vec<Tick> {
    let mut ticks: Vec<Tick> = windows
        .iter()
        .map(|window| Tick {
            due: start + window.sample_every,
            every: window.sample_every,
            kind: TickKind::Average(window.label.clone()),
        })
        .collect();
    for period in MeterPeriod::ALL {
        ticks.push(Tick {
            due: start + period.interval(),
            every: period.interval(),
            kind: TickKind::Meter(period),
        });
    }
    ticks
}

/// Continuously prints every decoded frame. Malformed datagrams are dropped
/// by the decoder and never interrupt the loop.
pub fn dump(listener: UdpListener) -> Result<()> {
    loop {
        match listener.recv_frame() {
            Ok(Some(telemetry)) => println!("{telemetry:?}"),
            Ok(None) => {}
            Err(err) => error!("UDP read error: {err}"),
        }
    }
}

/// Runs the metrics daemon for one device.
///
/// Frame arrival and timer ticks are both handled on this thread, so every
/// engine update completes before the next trigger is looked at.
pub fn run(
    listener: UdpListener,
    device_name: &str,
    config: PackConfig,
    windows: Vec<AverageWindow>,
    output: commandline::DaemonOutput,
) -> Result<()> {
    info!(
        "Starting daemon mode: device={device_name}, output={output:?}, windows={windows:?}"
    );

    let mut sink = build_sink(output)?;
    let mut engine = MetricsEngine::new(config, windows.clone());
    let mut ticks = build_schedule(&windows, Instant::now());

    loop {
        match listener.recv_frame() {
            Ok(Some(telemetry)) => {
                debug!("Decoded frame: {telemetry:?}");
                let values = engine.apply(&telemetry, Instant::now());
                if let Err(err) = sink.publish(device_name, values) {
                    error!("Failed to publish frame update: {err:?}");
                }
            }
            Ok(None) => {}
            Err(err) => error!("UDP read error: {err}"),
        }

        let now = Instant::now();
        for tick in &mut ticks {
            if tick.due > now {
                continue;
            }
            tick.due = now + tick.every;
            let values = match &tick.kind {
                TickKind::Average(label) => engine.sample_average(label),
                TickKind::Meter(period) => engine.meter_tick(*period),
            };
            if let Err(err) = sink.publish(device_name, values) {
                error!("Failed to publish tick update: {err:?}");
            }
        }
    }
}
