use anyhow::{Context, Result};
use axpert_lib::protocol::QpgsQuery;
use axpert_lib::tcp::Inverter;
use axpert_lib::{Reading, SystemTotals};
use log::{debug, error, info, warn};
use std::path::Path;

use crate::commandline::{DaemonOutput, MqttFormat};
use crate::config::{AppConfig, Overrides};
use crate::mqtt;

/// Outcome of one poll over all configured units.
#[derive(Debug)]
pub struct Cycle {
    /// Decoded units.
    pub readings: Vec<Reading>,
    /// Position of each decoded unit in the configured unit list, parallel
    /// to `readings`.
    pub positions: Vec<usize>,
    /// Only present when every configured unit decoded.
    pub totals: Option<SystemTotals>,
}

pub fn load_config(config_file: &Path, overrides: &Overrides) -> AppConfig {
    let mut config = AppConfig::load_or_default(config_file);
    overrides.apply(&mut config);
    config
}

fn connect(config: &AppConfig) -> Result<Inverter> {
    let endpoint = config.inverter_endpoint();
    let mut inverter = Inverter::connect(endpoint.as_str(), config.read_timeout())
        .with_context(|| format!("Cannot connect to serial bridge at {endpoint}"))?;
    inverter.set_delay(config.inverter_delay());
    Ok(inverter)
}

pub fn query_unit(config: &AppConfig, unit: u8) -> Result<Reading> {
    let mut inverter = connect(config)?;
    inverter
        .get_parallel_status(unit)
        .with_context(|| format!("Cannot get status of {}", QpgsQuery::inverter_id(unit)))
}

pub fn poll_cycle(config: &AppConfig) -> Result<Cycle> {
    let mut inverter = connect(config)?;
    let mut readings = Vec::with_capacity(config.units.len());
    let mut positions = Vec::with_capacity(config.units.len());
    for (index, &unit) in config.units.iter().enumerate() {
        let inverter_id = QpgsQuery::inverter_id(unit);
        match inverter.get_parallel_status(unit) {
            Ok(reading) => {
                debug!(
                    "{inverter_id}: battery_real_charge_current={} A, battery_real_power={} W, ac_input_power_estimate={} W",
                    reading.battery_real_charge_current,
                    reading.battery_real_power,
                    reading.ac_input_power_estimate
                );
                readings.push(reading);
                positions.push(index);
            }
            Err(e) => error!("Skipping {inverter_id} this cycle: {e}"),
        }
    }

    let totals = if !readings.is_empty() && readings.len() == config.units.len() {
        Some(SystemTotals::aggregate(&readings))
    } else {
        warn!(
            "{} of {} units decoded, system totals not published",
            readings.len(),
            config.units.len()
        );
        None
    };
    Ok(Cycle {
        readings,
        positions,
        totals,
    })
}

/// Flattens `value` into `(topic, payload)` pairs, one per leaf, below `topic`.
fn simple_format_messages(topic: &str, value: &serde_json::Value) -> Vec<(String, String)> {
    fn collect(topic: &str, val: &serde_json::Value, out: &mut Vec<(String, String)>) {
        match val {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    collect(&format!("{topic}/{k}"), v, out);
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    collect(&format!("{topic}/{i}"), v, out);
                }
            }
            serde_json::Value::String(s) => out.push((topic.to_string(), s.clone())),
            serde_json::Value::Number(n) => out.push((topic.to_string(), n.to_string())),
            serde_json::Value::Bool(b) => out.push((topic.to_string(), u8::from(*b).to_string())),
            serde_json::Value::Null => {
                // Do not publish null values
            }
        }
    }
    let mut out = Vec::new();
    collect(topic, value, &mut out);
    out
}

fn publish_document(
    publisher: &mqtt::MqttPublisher,
    format: MqttFormat,
    topic: &str,
    value: &serde_json::Value,
    retain: bool,
) {
    match format {
        MqttFormat::Json => match serde_json::to_string(value) {
            Ok(json_payload) => {
                if let Err(e) = publisher.publish(topic, &json_payload, retain) {
                    error!("Failed to publish data to MQTT: {e:#}");
                } else {
                    info!("Published to {topic}");
                }
            }
            Err(e) => error!("Failed to serialize data to JSON string: {e}"),
        },
        MqttFormat::Simple => {
            for (sub_topic, payload) in simple_format_messages(topic, value) {
                if let Err(e) = publisher.publish(&sub_topic, &payload, retain) {
                    error!("Failed to publish message to topic {sub_topic}: {e:#}");
                }
            }
            info!("Published below {topic}");
        }
    }
}

fn publish_cycle(
    publisher: &mqtt::MqttPublisher,
    format: MqttFormat,
    config: &AppConfig,
    cycle: &Cycle,
) {
    for (index, reading) in cycle.positions.iter().zip(&cycle.readings) {
        match serde_json::to_value(reading) {
            Ok(value) => publish_document(
                publisher,
                format,
                &config.unit_topic(*index),
                &value,
                config.mqtt_retain,
            ),
            Err(e) => error!("Failed to serialize '{}': {e}", reading.inverter_id),
        }
    }
    if let Some(totals) = &cycle.totals {
        match serde_json::to_value(totals) {
            Ok(value) => publish_document(
                publisher,
                format,
                &config.totals_topic(),
                &value,
                config.mqtt_retain,
            ),
            Err(e) => error!("Failed to serialize system totals: {e}"),
        }
    }
}

pub fn print_cycle(config: &AppConfig, cycle: &Cycle) -> Result<()> {
    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
    for (index, reading) in cycle.positions.iter().zip(&cycle.readings) {
        println!(
            "{} ({}): {}",
            config.unit_topic(*index),
            reading.inverter_id,
            serde_json::to_string(reading).with_context(|| "Cannot serialize reading")?
        );
    }
    if let Some(totals) = &cycle.totals {
        println!(
            "{}: {}",
            config.totals_topic(),
            serde_json::to_string(totals).with_context(|| "Cannot serialize system totals")?
        );
    }
    println!("--------------------------");
    Ok(())
}

pub fn run(config_file: &Path, overrides: &Overrides, output: DaemonOutput) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, config={config_file:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;

    loop {
        let config = load_config(config_file, overrides);

        if let DaemonOutput::Mqtt { .. } = output {
            let wanted = config.mqtt();
            if mqtt_publisher.as_ref().map_or(true, |p| p.config() != &wanted) {
                // the old client has to disconnect before the new one connects
                mqtt_publisher = None;
                match mqtt::MqttPublisher::new(wanted) {
                    Ok(publisher) => {
                        info!("MQTT Publisher created successfully.");
                        mqtt_publisher = Some(publisher);
                    }
                    Err(e) => error!("Failed to create MQTT publisher: {e:#}"),
                }
            }
        }

        match poll_cycle(&config) {
            Ok(cycle) => match output {
                DaemonOutput::Console => print_cycle(&config, &cycle)?,
                DaemonOutput::Mqtt { format } => {
                    if let Some(publisher) = &mqtt_publisher {
                        publish_cycle(publisher, format, &config, &cycle);
                    } else {
                        warn!("MQTT output selected, but publisher is not initialized. Skipping publish.");
                    }
                }
            },
            Err(e) => error!("{e:#}"),
        }

        std::thread::sleep(config.cycle_delay());
    }
}
