use crate::fault::FaultFlags;
use crate::protocol::{parse_float, parse_int, round2, QpgsFields};
use crate::status::StatusFlags;
use serde::Serialize;

/// Below this combined PV voltage the per-string split is not attempted.
pub const PV_VOLTAGE_NOISE_FLOOR: f64 = 0.1;

/// Splits the total PV current over both strings in proportion to their
/// voltages. Returns `(pv1_current, pv2_current)`, rounded.
pub fn split_pv_current(total_current: f64, pv1_voltage: f64, pv2_voltage: f64) -> (f64, f64) {
    let voltage_sum = pv1_voltage + pv2_voltage;
    if voltage_sum > PV_VOLTAGE_NOISE_FLOOR {
        (
            round2(total_current * (pv1_voltage / voltage_sum)),
            round2(total_current * (pv2_voltage / voltage_sum)),
        )
    } else {
        (round2(total_current), 0.0)
    }
}

/// Signed battery current, positive while charging.
pub fn net_battery_current(charging: i32, discharging: i32) -> f64 {
    let net = match (charging, discharging) {
        (c, 0) if c > 0 => c,
        (0, d) if d > 0 => -d,
        (c, d) if c > 0 && d > 0 => c - d,
        _ => 0,
    };
    round2(f64::from(net))
}

/// Decoded and derived telemetry of one parallel unit for one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub inverter_id: String,
    pub parallel_configuration: String,
    pub serial_number: String,
    pub work_mode: String,
    pub grid_input_voltage: f64,
    pub grid_input_frequency: f64,
    pub ac_output_voltage: f64,
    pub ac_output_frequency: f64,
    pub ac_output_apparent_power: i32,
    pub ac_output_active_power: i32,
    pub ac_output_reactive_power: f64,
    pub load_percentage: i32,
    pub battery_voltage: f64,
    pub battery_charging_current: i32,
    pub battery_soc: i32,
    #[serde(rename = "pv1_input_voltaje")]
    pub pv1_input_voltage: f64,
    /// Charging current of the whole cluster from all sources. Decoded but
    /// not part of the published record.
    #[serde(skip)]
    pub total_charging_current: i32,
    pub output_mode: i32,
    pub charger_source_priority: i32,
    pub config_max_charger_current: i32,
    pub config_max_charge_range: i32,
    pub config_max_ac_charger_current: i32,
    pub pv_total_input_current: f64,
    pub battery_discharge_current: i32,
    #[serde(rename = "pv2_input_voltaje")]
    pub pv2_input_voltage: f64,
    pub pv1_input_current: f64,
    pub pv2_input_current: f64,
    pub pv1_input_power: f64,
    pub pv2_input_power: f64,
    pub battery_real_charge_current: f64,
    pub battery_real_power: f64,
    /// Grid voltage times the configured max AC charger current; a capacity
    /// figure, not a measurement.
    pub ac_input_power_estimate: f64,
    #[serde(flatten)]
    pub faults: FaultFlags,
    #[serde(flatten)]
    pub status: StatusFlags,
}

impl Reading {
    pub fn from_fields(inverter_id: &str, fields: &QpgsFields) -> Self {
        let int = |token: &str| parse_int(token).unwrap_or(0);
        let float = |token: &str| round2(parse_float(token));

        let pv1_input_voltage = float(fields.pv1_voltage);
        let pv2_input_voltage = float(fields.pv2_voltage);
        let pv_total_input_current = float(fields.pv_total_current);
        let (pv1_input_current, pv2_input_current) =
            split_pv_current(pv_total_input_current, pv1_input_voltage, pv2_input_voltage);

        let ac_output_apparent_power = int(fields.ac_output_apparent_power);
        let ac_output_active_power = int(fields.ac_output_active_power);

        let battery_voltage = float(fields.battery_voltage);
        let battery_charging_current = int(fields.battery_charging_current);
        let battery_discharge_current = int(fields.battery_discharge_current);
        let battery_real_charge_current =
            net_battery_current(battery_charging_current, battery_discharge_current);

        let grid_input_voltage = float(fields.grid_voltage);
        let config_max_ac_charger_current = int(fields.max_ac_charger_current);

        Self {
            inverter_id: inverter_id.to_owned(),
            parallel_configuration: fields.parallel_configuration.to_owned(),
            serial_number: fields.serial_number.to_owned(),
            work_mode: fields.work_mode.to_owned(),
            grid_input_voltage,
            grid_input_frequency: float(fields.grid_frequency),
            ac_output_voltage: float(fields.ac_output_voltage),
            ac_output_frequency: float(fields.ac_output_frequency),
            ac_output_apparent_power,
            ac_output_active_power,
            ac_output_reactive_power: round2(
                f64::from(ac_output_apparent_power) - f64::from(ac_output_active_power),
            ),
            load_percentage: int(fields.load_percentage),
            battery_voltage,
            battery_charging_current,
            battery_soc: int(fields.battery_soc),
            pv1_input_voltage,
            total_charging_current: int(fields.total_charging_current),
            output_mode: int(fields.output_mode),
            charger_source_priority: int(fields.charger_source_priority),
            config_max_charger_current: int(fields.max_charger_current),
            config_max_charge_range: int(fields.max_charge_range),
            config_max_ac_charger_current,
            pv_total_input_current,
            battery_discharge_current,
            pv2_input_voltage,
            pv1_input_current,
            pv2_input_current,
            pv1_input_power: round2(pv1_input_voltage * pv1_input_current),
            pv2_input_power: round2(pv2_input_voltage * pv2_input_current),
            battery_real_charge_current,
            battery_real_power: round2(battery_real_charge_current * battery_voltage),
            ac_input_power_estimate: round2(
                grid_input_voltage * f64::from(config_max_ac_charger_current),
            ),
            faults: FaultFlags::decode(fields.fault_code),
            status: StatusFlags::decode(fields.status_bits),
        }
    }

    pub fn pv_input_power(&self) -> f64 {
        self.pv1_input_power + self.pv2_input_power
    }

    pub fn has_alarm(&self) -> bool {
        self.faults.any() || self.status.raises_system_alarm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Fault;
    use crate::protocol::tests::{framed, SAMPLE_PAYLOAD};
    use crate::protocol::{FieldSet, QpgsQuery};

    fn decode(payload: &str) -> Reading {
        let fields = FieldSet::tokenize(payload, QpgsQuery::MIN_FIELDS).unwrap();
        Reading::from_fields("QPGS0", &QpgsFields::map(&fields))
    }

    fn with_field_of(payload: &str, index: usize, value: &str) -> String {
        let mut tokens: Vec<&str> = payload.split(' ').collect();
        tokens[index] = value;
        tokens.join(" ")
    }

    fn with_field(index: usize, value: &str) -> String {
        with_field_of(SAMPLE_PAYLOAD, index, value)
    }

    #[test]
    fn pv_split_falls_back_to_first_string() {
        assert_eq!(split_pv_current(5.0, 0.0, 0.0), (5.0, 0.0));
        assert_eq!(split_pv_current(5.0, 0.05, 0.05), (5.0, 0.0));
    }

    #[test]
    fn pv_split_is_proportional() {
        assert_eq!(split_pv_current(10.0, 40.0, 40.0), (5.0, 5.0));
        assert_eq!(split_pv_current(9.0, 100.0, 50.0), (6.0, 3.0));
        assert_eq!(split_pv_current(10.0, 0.0, 120.0), (0.0, 10.0));
    }

    #[test]
    fn net_battery_current_cases() {
        assert_eq!(net_battery_current(10, 0), 10.0);
        assert_eq!(net_battery_current(0, 7), -7.0);
        assert_eq!(net_battery_current(10, 3), 7.0);
        assert_eq!(net_battery_current(3, 10), -7.0);
        assert_eq!(net_battery_current(0, 0), 0.0);
        assert_eq!(net_battery_current(-4, 0), 0.0);
    }

    #[test]
    fn decodes_sample_reply() {
        let reading = decode(SAMPLE_PAYLOAD);
        assert_eq!(reading.inverter_id, "QPGS0");
        assert_eq!(reading.parallel_configuration, "1");
        assert_eq!(reading.serial_number, "92932004102443");
        assert_eq!(reading.work_mode, "B");
        assert_eq!(reading.grid_input_voltage, 230.0);
        assert_eq!(reading.grid_input_frequency, 50.0);
        assert_eq!(reading.ac_output_apparent_power, 920);
        assert_eq!(reading.ac_output_active_power, 851);
        assert_eq!(reading.ac_output_reactive_power, 69.0);
        assert_eq!(reading.load_percentage, 18);
        assert_eq!(reading.battery_voltage, 51.2);
        assert_eq!(reading.battery_charging_current, 10);
        assert_eq!(reading.battery_soc, 87);
        assert_eq!(reading.total_charging_current, 20);
        assert_eq!(reading.output_mode, 0);
        assert_eq!(reading.charger_source_priority, 1);
        assert_eq!(reading.config_max_charger_current, 60);
        assert_eq!(reading.config_max_charge_range, 120);
        assert_eq!(reading.config_max_ac_charger_current, 30);
        assert_eq!(reading.pv_total_input_current, 8.0);
        assert_eq!(reading.battery_discharge_current, 0);
        assert_eq!(reading.pv1_input_current, 4.0);
        assert_eq!(reading.pv2_input_current, 4.0);
        assert_eq!(reading.pv1_input_power, 480.0);
        assert_eq!(reading.pv2_input_power, 480.0);
        assert_eq!(reading.battery_real_charge_current, 10.0);
        assert_eq!(reading.battery_real_power, 512.0);
        assert_eq!(reading.ac_input_power_estimate, 6900.0);
        assert!(!reading.faults.any());
        assert!(reading.status.status_solar_charging);
        assert!(!reading.has_alarm());
    }

    #[test]
    fn decode_through_frame() {
        let reading = QpgsQuery::decode(&framed(SAMPLE_PAYLOAD), "QPGS1").unwrap();
        assert_eq!(reading.inverter_id, "QPGS1");
        assert_eq!(reading.pv2_input_voltage, 120.0);
    }

    #[test]
    fn garbled_values_default_to_zero() {
        let reading = decode(&with_field(11, "5x.?"));
        assert_eq!(reading.battery_voltage, 5.0);
        let reading = decode(&with_field(12, "---"));
        assert_eq!(reading.battery_charging_current, 0);
        assert_eq!(reading.battery_real_charge_current, 0.0);
        let reading = decode(&with_field(3, "?!"));
        assert!(!reading.faults.any());
        let reading = decode(&with_field(19, "1010"));
        assert_eq!(reading.status, StatusFlags::default());
        assert!(!reading.has_alarm());
    }

    #[test]
    fn extreme_and_garbled_tokens_never_fail_decode() {
        let huge = "9".repeat(400);
        let tokens = [
            "-2147483648",
            "2147483647",
            "99999999999999999999",
            "+",
            "-",
            ".",
            "1e9",
            "-0.0",
            "\u{fffd}12",
            huge.as_str(),
        ];
        for token in tokens {
            for index in 0..QpgsQuery::MIN_FIELDS {
                let payload = with_field(index, token);
                let result = QpgsQuery::decode(&framed(&payload), "QPGS0");
                assert!(result.is_ok(), "field {index} = {token:?}: {result:?}");
            }
        }
    }

    #[test]
    fn extreme_power_tokens_widen_reactive_power() {
        let payload = with_field(8, "2147483647");
        let payload = with_field_of(&payload, 9, "-1");
        let reading = QpgsQuery::decode(&framed(&payload), "QPGS0").unwrap();
        assert_eq!(reading.ac_output_apparent_power, i32::MAX);
        assert_eq!(reading.ac_output_active_power, -1);
        assert_eq!(reading.ac_output_reactive_power, 2147483648.0);

        let payload = with_field(8, "-2147483648");
        let payload = with_field_of(&payload, 9, "2147483647");
        let reading = QpgsQuery::decode(&framed(&payload), "QPGS0").unwrap();
        assert_eq!(reading.ac_output_reactive_power, -4294967295.0);
    }

    #[test]
    fn non_utf8_bytes_decode_leniently() {
        let mut raw = vec![crate::protocol::START_MARKER];
        for (index, token) in SAMPLE_PAYLOAD.split(' ').enumerate() {
            if index > 0 {
                raw.push(b' ');
            }
            match index {
                11 => raw.extend_from_slice(&[b'5', b'1', 0xff, 0xfe]),
                13 => raw.extend_from_slice(&[0xc3, b'8']),
                _ => raw.extend_from_slice(token.as_bytes()),
            }
        }
        let crc = crate::protocol::checksum(&raw);
        raw.extend_from_slice(&crc);
        let reading = QpgsQuery::decode(&raw, "QPGS0").unwrap();
        assert_eq!(reading.battery_voltage, 51.0);
        assert_eq!(reading.battery_soc, 0);
        assert_eq!(reading.pv2_input_voltage, 120.0);
    }

    #[test]
    fn fault_and_status_drive_alarm() {
        let reading = decode(&with_field(3, "07"));
        assert!(reading.faults.is_set(Fault::OverloadTimeout));
        assert!(reading.has_alarm());
        let reading = decode(&with_field(19, "00100010"));
        assert!(reading.status.alarm_scc_loss);
        assert!(reading.has_alarm());
    }

    #[test]
    fn discharging_unit_has_negative_power() {
        let payload = with_field(26, "020");
        let payload = payload.replacen(" 010 087 ", " 000 087 ", 1);
        let reading = decode(&payload);
        assert_eq!(reading.battery_real_charge_current, -20.0);
        assert_eq!(reading.battery_real_power, -1024.0);
    }

    #[test]
    fn derived_values_are_rounded() {
        let payload = with_field(27, "110.3");
        let reading = decode(&payload);
        for value in [
            reading.pv1_input_current,
            reading.pv2_input_current,
            reading.pv1_input_power,
            reading.pv2_input_power,
        ] {
            assert_eq!(round2(value), value);
        }
        assert_eq!(reading.pv1_input_current, 4.17);
        assert_eq!(reading.pv2_input_current, 3.83);
        assert_eq!(reading.pv2_input_power, 422.45);
    }

    #[test]
    fn serializes_published_keys() {
        let value = serde_json::to_value(decode(SAMPLE_PAYLOAD)).unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map["pv1_input_voltaje"], 120.0);
        assert_eq!(map["pv2_input_voltaje"], 120.0);
        assert_eq!(map["battery_real_charge_current"], 10.0);
        assert_eq!(map["07_overload_timeout"], 0);
        assert_eq!(map["status_load_on"], 1);
        assert!(!map.contains_key("total_charging_current"));
        assert!(!map.contains_key("faults"));
        assert_eq!(map.len(), 31 + 29 + 7);
    }
}
