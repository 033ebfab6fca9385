use serde::{Serialize, Serializer};

pub(crate) fn bool_as_int<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

/// Flags carried in the 8 character status bit string (field 19),
/// transmitted b7 first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    #[serde(serialize_with = "bool_as_int")]
    pub alarm_scc_loss: bool,
    #[serde(serialize_with = "bool_as_int")]
    pub status_ac_charging: bool,
    #[serde(serialize_with = "bool_as_int")]
    pub status_solar_charging: bool,
    #[serde(serialize_with = "bool_as_int")]
    pub alarm_battery_health: bool,
    #[serde(serialize_with = "bool_as_int")]
    pub alarm_line_loss: bool,
    #[serde(serialize_with = "bool_as_int")]
    pub status_load_on: bool,
    #[serde(serialize_with = "bool_as_int")]
    pub status_configuration: bool,
}

impl StatusFlags {
    pub const BITS: usize = 8;

    /// Anything but exactly eight `0`/`1` characters leaves every flag clear.
    pub fn decode(bits: &str) -> Self {
        let bytes = bits.as_bytes();
        if bytes.len() != Self::BITS || !bytes.iter().all(|b| matches!(b, b'0' | b'1')) {
            log::trace!("Ignoring malformed status bits {bits:?}");
            return Self::default();
        }
        // b7 is the first character on the wire
        let bit = |n: usize| bytes[Self::BITS - 1 - n] == b'1';
        Self {
            alarm_scc_loss: !bit(7),
            status_ac_charging: bit(6),
            status_solar_charging: bit(5),
            alarm_battery_health: bit(4) || bit(3),
            alarm_line_loss: bit(2),
            status_load_on: bit(1),
            status_configuration: bit(0),
        }
    }

    /// Only `alarm_scc_loss` feeds `system_general_status`; the other
    /// alarm flags are published per unit.
    pub fn raises_system_alarm(&self) -> bool {
        self.alarm_scc_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_bit() {
        let flags = StatusFlags::decode("10100010");
        assert_eq!(
            flags,
            StatusFlags {
                alarm_scc_loss: false,
                status_ac_charging: false,
                status_solar_charging: true,
                alarm_battery_health: false,
                alarm_line_loss: false,
                status_load_on: true,
                status_configuration: false,
            }
        );
        assert!(!flags.raises_system_alarm());

        let flags = StatusFlags::decode("01000101");
        assert!(flags.alarm_scc_loss);
        assert!(flags.status_ac_charging);
        assert!(!flags.status_solar_charging);
        assert!(flags.alarm_line_loss);
        assert!(flags.status_configuration);
        assert!(flags.raises_system_alarm());
    }

    #[test]
    fn only_scc_loss_raises_system_alarm() {
        let line_loss = StatusFlags::decode("10000100");
        assert!(line_loss.alarm_line_loss);
        assert!(!line_loss.raises_system_alarm());
        let battery = StatusFlags::decode("10011000");
        assert!(battery.alarm_battery_health);
        assert!(!battery.raises_system_alarm());
        assert!(StatusFlags::decode("00000000").raises_system_alarm());
    }

    #[test]
    fn battery_health_uses_bits_four_and_three() {
        assert!(!StatusFlags::decode("10000000").alarm_battery_health);
        assert!(StatusFlags::decode("10010000").alarm_battery_health);
        assert!(StatusFlags::decode("10001000").alarm_battery_health);
        assert!(StatusFlags::decode("10011000").alarm_battery_health);
    }

    #[test]
    fn malformed_input_is_ignored() {
        for bits in ["", "1010001", "101000100", "1010002x", "abcdefgh", "1 100010"] {
            assert_eq!(StatusFlags::decode(bits), StatusFlags::default(), "{bits:?}");
        }
    }

    #[test]
    fn serializes_flags_as_integers() {
        let value = serde_json::to_value(StatusFlags::decode("00000000")).unwrap();
        assert_eq!(value["alarm_scc_loss"], 1);
        assert_eq!(value["status_load_on"], 0);
        assert_eq!(value.as_object().unwrap().len(), 7);
    }
}
