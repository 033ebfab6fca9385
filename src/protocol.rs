use crate::error::{Error, FrameError};
use crate::reading::Reading;

// Lower bound for the idle time between two queries on the same link
pub const MINIMUM_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

pub const START_MARKER: u8 = b'(';
pub const TERMINATOR: u8 = b'\r';
pub const MAX_FRAME_LENGTH: usize = 512;

/// CRC-16/XMODEM as used by Voltronic firmware. CRC bytes that would collide
/// with framing characters are bumped by one.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    crc16::State::<crc16::XMODEM>::calculate(data)
        .to_be_bytes()
        .map(|b| match b {
            0x28 | 0x0d | 0x0a => b + 1,
            _ => b,
        })
}

fn strip_checksum(framed: &[u8]) -> &[u8] {
    if framed.len() >= 3 {
        let (data, crc) = framed.split_at(framed.len() - 2);
        if checksum(data) == [crc[0], crc[1]] {
            return data;
        }
        log::debug!(
            "Checksum mismatch - calculated={:02X?} received={:02X?}",
            checksum(data),
            crc
        );
    }
    // Keep going without a valid checksum, the trailing bytes may still be
    // binary garbage glued to the last field.
    let end = framed
        .iter()
        .rposition(|b| b.is_ascii_graphic() || *b == b' ')
        .map_or(framed.len(), |p| p + 1);
    &framed[..end]
}

/// Returns the field payload following the first `(` of a response, with the
/// checksum removed.
pub fn extract_payload(raw: &[u8]) -> std::result::Result<String, FrameError> {
    let start = raw
        .iter()
        .position(|&b| b == START_MARKER)
        .ok_or(FrameError::MissingStartMarker)?;
    let body = strip_checksum(&raw[start..]);
    let payload = String::from_utf8_lossy(&body[1..]).into_owned();
    if payload.starts_with("NAK") {
        return Err(FrameError::Rejected);
    }
    Ok(payload)
}

/// Whitespace separated tokens of one response, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet(Vec<String>);

impl FieldSet {
    pub fn tokenize(payload: &str, required: usize) -> std::result::Result<Self, Error> {
        let fields: Vec<String> = payload.split_whitespace().map(str::to_owned).collect();
        if fields.len() < required {
            log::warn!(
                "Invalid field count - required={} received={}",
                required,
                fields.len()
            );
            return Err(Error::Schema {
                found: fields.len(),
                required,
            });
        }
        Ok(Self(fields))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> &str {
        self.0.get(index).map_or("", String::as_str)
    }
}

fn numeric_prefix(token: &str, allow_fraction: bool) -> &str {
    let bytes = token.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if allow_fraction && end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    &token[..end]
}

/// Leading integer of a token; a fractional part is truncated.
pub fn parse_int(token: &str) -> Option<i32> {
    numeric_prefix(token, false).parse().ok()
}

/// Leading decimal number of a token, `0.0` when there is none.
pub fn parse_float(token: &str) -> f64 {
    numeric_prefix(token, true).parse().unwrap_or(0.0)
}

/// Rounds half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

mod index {
    pub const PARALLEL_CONFIGURATION: usize = 0;
    pub const SERIAL_NUMBER: usize = 1;
    pub const WORK_MODE: usize = 2;
    pub const FAULT_CODE: usize = 3;
    pub const GRID_VOLTAGE: usize = 4;
    pub const GRID_FREQUENCY: usize = 5;
    pub const AC_OUTPUT_VOLTAGE: usize = 6;
    pub const AC_OUTPUT_FREQUENCY: usize = 7;
    pub const AC_OUTPUT_APPARENT_POWER: usize = 8;
    pub const AC_OUTPUT_ACTIVE_POWER: usize = 9;
    pub const LOAD_PERCENTAGE: usize = 10;
    pub const BATTERY_VOLTAGE: usize = 11;
    pub const BATTERY_CHARGING_CURRENT: usize = 12;
    pub const BATTERY_SOC: usize = 13;
    pub const PV1_VOLTAGE: usize = 14;
    pub const TOTAL_CHARGING_CURRENT: usize = 15;
    // 16..=18 carry cluster-wide output totals, recomputed from the units instead
    pub const STATUS_BITS: usize = 19;
    pub const OUTPUT_MODE: usize = 20;
    pub const CHARGER_SOURCE_PRIORITY: usize = 21;
    pub const MAX_CHARGER_CURRENT: usize = 22;
    pub const MAX_CHARGE_RANGE: usize = 23;
    pub const MAX_AC_CHARGER_CURRENT: usize = 24;
    pub const PV_TOTAL_CURRENT: usize = 25;
    pub const BATTERY_DISCHARGE_CURRENT: usize = 26;
    pub const PV2_VOLTAGE: usize = 27;
}

/// Raw tokens of a QPGS reply, named by position.
#[derive(Debug, Clone, Copy)]
pub struct QpgsFields<'a> {
    pub parallel_configuration: &'a str,
    pub serial_number: &'a str,
    pub work_mode: &'a str,
    pub fault_code: &'a str,
    pub grid_voltage: &'a str,
    pub grid_frequency: &'a str,
    pub ac_output_voltage: &'a str,
    pub ac_output_frequency: &'a str,
    pub ac_output_apparent_power: &'a str,
    pub ac_output_active_power: &'a str,
    pub load_percentage: &'a str,
    pub battery_voltage: &'a str,
    pub battery_charging_current: &'a str,
    pub battery_soc: &'a str,
    pub pv1_voltage: &'a str,
    pub total_charging_current: &'a str,
    pub status_bits: &'a str,
    pub output_mode: &'a str,
    pub charger_source_priority: &'a str,
    pub max_charger_current: &'a str,
    pub max_charge_range: &'a str,
    pub max_ac_charger_current: &'a str,
    pub pv_total_current: &'a str,
    pub battery_discharge_current: &'a str,
    pub pv2_voltage: &'a str,
}

impl<'a> QpgsFields<'a> {
    pub fn map(fields: &'a FieldSet) -> Self {
        use index::*;
        Self {
            parallel_configuration: fields.get(PARALLEL_CONFIGURATION),
            serial_number: fields.get(SERIAL_NUMBER),
            work_mode: fields.get(WORK_MODE),
            fault_code: fields.get(FAULT_CODE),
            grid_voltage: fields.get(GRID_VOLTAGE),
            grid_frequency: fields.get(GRID_FREQUENCY),
            ac_output_voltage: fields.get(AC_OUTPUT_VOLTAGE),
            ac_output_frequency: fields.get(AC_OUTPUT_FREQUENCY),
            ac_output_apparent_power: fields.get(AC_OUTPUT_APPARENT_POWER),
            ac_output_active_power: fields.get(AC_OUTPUT_ACTIVE_POWER),
            load_percentage: fields.get(LOAD_PERCENTAGE),
            battery_voltage: fields.get(BATTERY_VOLTAGE),
            battery_charging_current: fields.get(BATTERY_CHARGING_CURRENT),
            battery_soc: fields.get(BATTERY_SOC),
            pv1_voltage: fields.get(PV1_VOLTAGE),
            total_charging_current: fields.get(TOTAL_CHARGING_CURRENT),
            status_bits: fields.get(STATUS_BITS),
            output_mode: fields.get(OUTPUT_MODE),
            charger_source_priority: fields.get(CHARGER_SOURCE_PRIORITY),
            max_charger_current: fields.get(MAX_CHARGER_CURRENT),
            max_charge_range: fields.get(MAX_CHARGE_RANGE),
            max_ac_charger_current: fields.get(MAX_AC_CHARGER_CURRENT),
            pv_total_current: fields.get(PV_TOTAL_CURRENT),
            battery_discharge_current: fields.get(BATTERY_DISCHARGE_CURRENT),
            pv2_voltage: fields.get(PV2_VOLTAGE),
        }
    }
}

/// Parallel unit status query (`QPGSn`).
pub struct QpgsQuery;

impl QpgsQuery {
    pub const MIN_FIELDS: usize = 28;

    pub fn inverter_id(unit: u8) -> String {
        format!("QPGS{unit}")
    }

    pub fn request(unit: u8) -> Vec<u8> {
        let mut tx_buffer = Self::inverter_id(unit).into_bytes();
        let crc = checksum(&tx_buffer);
        tx_buffer.extend_from_slice(&crc);
        tx_buffer.push(TERMINATOR);
        tx_buffer
    }

    /// Decodes one reply, `rx_buffer` being everything received before the CR.
    pub fn decode(rx_buffer: &[u8], inverter_id: &str) -> std::result::Result<Reading, Error> {
        let payload = extract_payload(rx_buffer)?;
        let fields = FieldSet::tokenize(&payload, Self::MIN_FIELDS)?;
        Ok(Reading::from_fields(inverter_id, &QpgsFields::map(&fields)))
    }
}
