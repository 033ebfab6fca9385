use crate::protocol::round2;
use crate::reading::Reading;
use crate::status::bool_as_int;
use serde::Serialize;

/// Cluster-wide figures of one poll cycle. Integer totals are summed as
/// `i64`, wide enough for any number of `i32` unit values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemTotals {
    pub total_system_battery_charging_current: i64,
    pub total_system_battery_discharge_current: i64,
    pub total_system_battery_voltage: f64,
    pub total_system_load_percentage: i64,
    pub total_system_pv_input_current: f64,
    pub total_system_pv_input_power: f64,
    #[serde(serialize_with = "bool_as_int")]
    pub system_general_status: bool,
    pub total_system_ac_output_apparent_power: i64,
    pub total_system_ac_output_active_power: i64,
    pub total_system_ac_output_reactive_power: i64,
    pub total_system_battery_soc: i64,
    pub total_system_grid_input_voltage: f64,
    pub total_system_grid_input_frequency: f64,
    pub total_system_battery_real_charge: f64,
    pub total_system_battery_power: f64,
    pub total_system_estimate_ac_input_power: f64,
}

impl SystemTotals {
    /// Combines the readings of every unit polled in one cycle. Callers pass
    /// the complete set; an empty slice yields all-zero totals.
    pub fn aggregate(readings: &[Reading]) -> Self {
        if readings.is_empty() {
            return Self::default();
        }
        let units = readings.len() as i64;
        let sum_int = |f: fn(&Reading) -> i32| {
            readings.iter().map(|r| i64::from(f(r))).sum::<i64>()
        };
        let sum = |f: fn(&Reading) -> f64| readings.iter().map(f).sum::<f64>();
        let mean = |f: fn(&Reading) -> f64| round2(sum(f) / units as f64);

        let apparent = sum_int(|r| r.ac_output_apparent_power);
        let active = sum_int(|r| r.ac_output_active_power);

        Self {
            total_system_battery_charging_current: sum_int(|r| r.battery_charging_current),
            total_system_battery_discharge_current: sum_int(|r| r.battery_discharge_current),
            total_system_battery_voltage: mean(|r| r.battery_voltage),
            total_system_load_percentage: sum_int(|r| r.load_percentage),
            total_system_pv_input_current: round2(sum(|r| r.pv_total_input_current)),
            total_system_pv_input_power: round2(sum(Reading::pv_input_power)),
            system_general_status: readings.iter().any(Reading::has_alarm),
            total_system_ac_output_apparent_power: apparent,
            total_system_ac_output_active_power: active,
            total_system_ac_output_reactive_power: apparent - active,
            total_system_battery_soc: sum_int(|r| r.battery_soc) / units,
            total_system_grid_input_voltage: mean(|r| r.grid_input_voltage),
            total_system_grid_input_frequency: mean(|r| r.grid_input_frequency),
            total_system_battery_real_charge: round2(sum(|r| r.battery_real_charge_current)),
            total_system_battery_power: round2(sum(|r| r.battery_real_power)),
            total_system_estimate_ac_input_power: round2(sum(|r| r.ac_input_power_estimate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultFlags;
    use crate::protocol::tests::{framed, SAMPLE_PAYLOAD};
    use crate::protocol::QpgsQuery;
    use crate::status::StatusFlags;

    fn sample(id: &str) -> Reading {
        QpgsQuery::decode(&framed(SAMPLE_PAYLOAD), id).unwrap()
    }

    #[test]
    fn sums_net_battery_flows() {
        let mut a = sample("QPGS0");
        let mut b = sample("QPGS1");
        a.battery_real_charge_current = 5.0;
        b.battery_real_charge_current = -2.0;
        a.battery_real_power = 500.0;
        b.battery_real_power = -100.0;
        let totals = SystemTotals::aggregate(&[a, b]);
        assert_eq!(totals.total_system_battery_real_charge, 3.0);
        assert_eq!(totals.total_system_battery_power, 400.0);
    }

    #[test]
    fn sums_and_means() {
        let a = sample("QPGS0");
        let mut b = sample("QPGS1");
        b.battery_voltage = 51.25;
        b.battery_soc = 90;
        b.grid_input_voltage = 231.1;
        b.grid_input_frequency = 49.99;
        b.battery_charging_current = 0;
        b.battery_discharge_current = 4;
        b.ac_output_apparent_power = 1000;
        b.ac_output_active_power = 900;
        b.pv_total_input_current = 2.5;
        b.pv1_input_power = 300.0;
        b.pv2_input_power = 0.0;
        b.ac_input_power_estimate = 0.0;

        let totals = SystemTotals::aggregate(&[a, b]);
        assert_eq!(totals.total_system_battery_charging_current, 10);
        assert_eq!(totals.total_system_battery_discharge_current, 4);
        assert_eq!(totals.total_system_battery_voltage, 51.23);
        assert_eq!(totals.total_system_battery_soc, 88);
        assert_eq!(totals.total_system_grid_input_voltage, 230.55);
        assert_eq!(totals.total_system_grid_input_frequency, 50.0);
        assert_eq!(totals.total_system_load_percentage, 36);
        assert_eq!(totals.total_system_ac_output_apparent_power, 1920);
        assert_eq!(totals.total_system_ac_output_active_power, 1751);
        assert_eq!(totals.total_system_ac_output_reactive_power, 169);
        assert_eq!(totals.total_system_pv_input_current, 10.5);
        assert_eq!(totals.total_system_pv_input_power, 1260.0);
        assert_eq!(totals.total_system_estimate_ac_input_power, 6900.0);
        assert!(!totals.system_general_status);
    }

    #[test]
    fn soc_mean_truncates() {
        let mut a = sample("QPGS0");
        let mut b = sample("QPGS1");
        a.battery_soc = 87;
        b.battery_soc = 88;
        assert_eq!(SystemTotals::aggregate(&[a, b]).total_system_battery_soc, 87);
    }

    #[test]
    fn any_unit_alarm_marks_system() {
        let a = sample("QPGS0");
        let mut b = sample("QPGS1");
        assert!(!SystemTotals::aggregate(&[a.clone(), b.clone()]).system_general_status);

        b.faults = FaultFlags::decode("83");
        assert!(SystemTotals::aggregate(&[a.clone(), b.clone()]).system_general_status);

        b.faults = FaultFlags::default();
        b.status = StatusFlags::decode("00000000");
        assert!(b.status.alarm_scc_loss);
        assert!(SystemTotals::aggregate(&[a.clone(), b.clone()]).system_general_status);

        b.status = StatusFlags::decode("11000000");
        assert!(!SystemTotals::aggregate(&[a, b]).system_general_status);
    }

    #[test]
    fn line_loss_and_battery_health_do_not_mark_system() {
        let mut a = sample("QPGS0");
        let mut b = sample("QPGS1");
        a.status = StatusFlags::decode("10000100");
        b.status = StatusFlags::decode("10011100");
        assert!(a.status.alarm_line_loss);
        assert!(b.status.alarm_battery_health);
        assert!(!SystemTotals::aggregate(&[a, b]).system_general_status);
    }

    #[test]
    fn extreme_unit_values_do_not_overflow() {
        let mut a = sample("QPGS0");
        let mut b = sample("QPGS1");
        a.ac_output_apparent_power = i32::MAX;
        b.ac_output_apparent_power = i32::MAX;
        a.ac_output_active_power = i32::MIN;
        b.ac_output_active_power = -1;
        a.battery_soc = i32::MAX;
        b.battery_soc = i32::MAX;
        a.load_percentage = i32::MAX;
        b.load_percentage = i32::MAX;
        a.battery_charging_current = i32::MIN;
        b.battery_charging_current = i32::MIN;

        let totals = SystemTotals::aggregate(&[a, b]);
        let max = i64::from(i32::MAX);
        let min = i64::from(i32::MIN);
        assert_eq!(totals.total_system_ac_output_apparent_power, 2 * max);
        assert_eq!(totals.total_system_ac_output_active_power, min - 1);
        assert_eq!(totals.total_system_ac_output_reactive_power, 2 * max - (min - 1));
        assert_eq!(totals.total_system_battery_soc, max);
        assert_eq!(totals.total_system_load_percentage, 2 * max);
        assert_eq!(totals.total_system_battery_charging_current, 2 * min);
    }

    #[test]
    fn generalizes_to_more_units() {
        let readings: Vec<Reading> = (0..3).map(|n| sample(&format!("QPGS{n}"))).collect();
        let totals = SystemTotals::aggregate(&readings);
        assert_eq!(totals.total_system_battery_charging_current, 30);
        assert_eq!(totals.total_system_battery_voltage, 51.2);
        assert_eq!(totals.total_system_battery_soc, 87);
    }

    #[test]
    fn empty_cycle_is_all_zero() {
        assert_eq!(SystemTotals::aggregate(&[]), SystemTotals::default());
    }

    #[test]
    fn serializes_status_as_integer() {
        let mut a = sample("QPGS0");
        a.faults = FaultFlags::decode("01");
        let value = serde_json::to_value(SystemTotals::aggregate(&[a])).unwrap();
        assert_eq!(value["system_general_status"], 1);
        assert_eq!(value.as_object().unwrap().len(), 16);
    }
}
