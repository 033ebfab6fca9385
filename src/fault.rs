use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Fault codes reported in field 3 of a QPGS reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Fault {
    FanLocked = 1,
    OverTemperature = 2,
    BatteryVoltageHigh = 3,
    BatteryVoltageLow = 4,
    OutputShortCircuited = 5,
    OutputVoltageHigh = 6,
    OverloadTimeout = 7,
    BusVoltageHigh = 8,
    BusSoftStartFailed = 9,
    PvOverCurrent = 10,
    PvOverVoltage = 11,
    DcdcOverCurrent = 12,
    BatteryDischargeOverCurrent = 13,
    OverCurrent = 51,
    BusVoltageLow = 52,
    InverterSoftStartFailed = 53,
    OverDcVoltageInAcOutput = 55,
    CurrentSensorFailed = 57,
    OutputVoltageLow = 58,
    PowerFeedbackProtection = 60,
    FirmwareVersionInconsistent = 71,
    CurrentSharingFault = 72,
    CanFault = 80,
    HostLoss = 81,
    SynchronizationLoss = 82,
    BatteryVoltageDiffParallel = 83,
    AcInputDiffParallel = 84,
    AcOutputUnbalance = 85,
    AcOutputModeDiff = 86,
}

/// Every known fault in code order, paired with its published key.
pub const FAULT_TABLE: [(Fault, &str); 29] = [
    (Fault::FanLocked, "01_fan_locked"),
    (Fault::OverTemperature, "02_over_temperature"),
    (Fault::BatteryVoltageHigh, "03_battery_voltage_high"),
    (Fault::BatteryVoltageLow, "04_battery_voltage_low"),
    (Fault::OutputShortCircuited, "05_output_short_circuited"),
    (Fault::OutputVoltageHigh, "06_output_voltage_high"),
    (Fault::OverloadTimeout, "07_overload_timeout"),
    (Fault::BusVoltageHigh, "08_bus_voltage_high"),
    (Fault::BusSoftStartFailed, "09_bus_soft_start_failed"),
    (Fault::PvOverCurrent, "10_pv_over_current"),
    (Fault::PvOverVoltage, "11_pv_over_voltage"),
    (Fault::DcdcOverCurrent, "12_dcdc_over_current"),
    (
        Fault::BatteryDischargeOverCurrent,
        "13_battery_discharge_over_current",
    ),
    (Fault::OverCurrent, "51_over_current"),
    (Fault::BusVoltageLow, "52_bus_voltage_low"),
    (
        Fault::InverterSoftStartFailed,
        "53_inverter_soft_start_failed",
    ),
    (
        Fault::OverDcVoltageInAcOutput,
        "55_over_dc_voltage_in_ac_output",
    ),
    (Fault::CurrentSensorFailed, "57_current_sensor_failed"),
    (Fault::OutputVoltageLow, "58_output_voltage_low"),
    (
        Fault::PowerFeedbackProtection,
        "60_power_feedback_protection",
    ),
    (
        Fault::FirmwareVersionInconsistent,
        "71_firmware_version_inconsistent",
    ),
    (Fault::CurrentSharingFault, "72_current_sharing_fault"),
    (Fault::CanFault, "80_can_fault"),
    (Fault::HostLoss, "81_host_loss"),
    (Fault::SynchronizationLoss, "82_synchronization_loss"),
    (
        Fault::BatteryVoltageDiffParallel,
        "83_battery_voltage_diff_parallel",
    ),
    (Fault::AcInputDiffParallel, "84_ac_input_diff_parallel"),
    (Fault::AcOutputUnbalance, "85_ac_output_unbalance"),
    (Fault::AcOutputModeDiff, "86_ac_output_mode_diff"),
];

impl Fault {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        FAULT_TABLE
            .iter()
            .map(|(fault, _)| *fault)
            .find(|fault| fault.code() == code)
    }

    pub fn key(self) -> &'static str {
        FAULT_TABLE
            .iter()
            .find(|(fault, _)| *fault == self)
            .map_or("", |(_, key)| key)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fault::FanLocked => write!(f, "Fan is locked when inverter is off"),
            Fault::OverTemperature => write!(f, "Over temperature"),
            Fault::BatteryVoltageHigh => write!(f, "Battery voltage is too high"),
            Fault::BatteryVoltageLow => write!(f, "Battery voltage is too low"),
            Fault::OutputShortCircuited => write!(f, "Output short circuited"),
            Fault::OutputVoltageHigh => write!(f, "Output voltage is too high"),
            Fault::OverloadTimeout => write!(f, "Overload time out"),
            Fault::BusVoltageHigh => write!(f, "Bus voltage is too high"),
            Fault::BusSoftStartFailed => write!(f, "Bus soft start failed"),
            Fault::PvOverCurrent => write!(f, "PV over current"),
            Fault::PvOverVoltage => write!(f, "PV over voltage"),
            Fault::DcdcOverCurrent => write!(f, "DCDC over current"),
            Fault::BatteryDischargeOverCurrent => write!(f, "Battery discharge over current"),
            Fault::OverCurrent => write!(f, "Over current"),
            Fault::BusVoltageLow => write!(f, "Bus voltage is too low"),
            Fault::InverterSoftStartFailed => write!(f, "Inverter soft start failed"),
            Fault::OverDcVoltageInAcOutput => write!(f, "Over DC voltage in AC output"),
            Fault::CurrentSensorFailed => write!(f, "Current sensor failed"),
            Fault::OutputVoltageLow => write!(f, "Output voltage is too low"),
            Fault::PowerFeedbackProtection => write!(f, "Power feedback protection"),
            Fault::FirmwareVersionInconsistent => write!(f, "Firmware version inconsistent"),
            Fault::CurrentSharingFault => write!(f, "Current sharing fault"),
            Fault::CanFault => write!(f, "CAN communication fault"),
            Fault::HostLoss => write!(f, "Host loss"),
            Fault::SynchronizationLoss => write!(f, "Synchronization loss"),
            Fault::BatteryVoltageDiffParallel => {
                write!(f, "Battery voltage detected differs between parallel units")
            }
            Fault::AcInputDiffParallel => {
                write!(f, "AC input voltage or frequency differs between parallel units")
            }
            Fault::AcOutputUnbalance => write!(f, "AC output current unbalance"),
            Fault::AcOutputModeDiff => write!(f, "AC output mode setting differs"),
        }
    }
}

/// The 29 fault flags of one unit. At most one is ever set since the
/// inverter reports a single active fault code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultFlags {
    active: Option<Fault>,
}

impl FaultFlags {
    /// Unparseable, `00` and unknown codes all decode to "no fault".
    pub fn decode(token: &str) -> Self {
        let active = crate::protocol::parse_int(token)
            .and_then(|code| u8::try_from(code).ok())
            .and_then(Fault::from_code);
        if active.is_none() && !token.trim_start_matches('0').is_empty() {
            log::trace!("Fault code {token:?} not in table, treated as no fault");
        }
        Self { active }
    }

    pub fn active(&self) -> Option<Fault> {
        self.active
    }

    pub fn is_set(&self, fault: Fault) -> bool {
        self.active == Some(fault)
    }

    pub fn any(&self) -> bool {
        self.active.is_some()
    }

    /// Published key and 0/1 value for every flag, in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u8)> + '_ {
        FAULT_TABLE
            .iter()
            .map(move |(fault, key)| (*key, u8::from(self.is_set(*fault))))
    }
}

impl Serialize for FaultFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FAULT_TABLE.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, &value)?;
        }
        map.end()
    }
}
