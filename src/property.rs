use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Vehicle property identifiers handled by the built-in pin table.
pub mod ids {
    pub const NIGHT_MODE: i32 = 0x1120_0407;
    pub const HVAC_FAN_SPEED: i32 = 0x1540_0500;
    pub const HVAC_TEMPERATURE_SET: i32 = 0x1560_0503;
    pub const HVAC_AC_ON: i32 = 0x1520_0505;
    pub const HVAC_RECIRC_ON: i32 = 0x1520_0508;
    pub const HVAC_SEAT_TEMPERATURE: i32 = 0x1540_050B;
}

/// Area qualifiers attached to decoded values.
pub mod areas {
    pub const GLOBAL: i32 = 0;
    pub const SEAT_DRIVER: i32 = 0x0001;
    pub const HVAC_ALL: i32 = 0x0075;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    Int32,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int32(i32),
    Float(f32),
}

impl ScalarValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ScalarValue::Int32(_) => ValueType::Int32,
            ScalarValue::Float(_) => ValueType::Float,
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            ScalarValue::Int32(v) => v == 0,
            ScalarValue::Float(v) => v == 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawValue {
    #[serde(default)]
    pub int32_values: Vec<i32>,
    #[serde(default)]
    pub float_values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub prop: i32,
    pub area_id: i32,
    /// Nanoseconds since the unix epoch.
    pub timestamp: i64,
    pub value: RawValue,
}

impl PropertyValue {
    pub fn new(value_type: ValueType) -> Self {
        let value = match value_type {
            ValueType::Int32 => RawValue {
                int32_values: vec![0],
                float_values: Vec::new(),
            },
            ValueType::Float => RawValue {
                int32_values: Vec::new(),
                float_values: vec![0.0],
            },
        };
        Self {
            prop: 0,
            area_id: areas::GLOBAL,
            timestamp: 0,
            value,
        }
    }

    /// First scalar of the given type, if the record carries one.
    pub fn scalar(&self, value_type: ValueType) -> Option<ScalarValue> {
        match value_type {
            ValueType::Int32 => self.value.int32_values.first().copied().map(ScalarValue::Int32),
            ValueType::Float => self.value.float_values.first().copied().map(ScalarValue::Float),
        }
    }

    pub fn set_scalar(&mut self, scalar: ScalarValue) {
        match scalar {
            ScalarValue::Int32(v) => {
                self.value.float_values.clear();
                self.value.int32_values = vec![v];
            }
            ScalarValue::Float(v) => {
                self.value.int32_values.clear();
                self.value.float_values = vec![v];
            }
        }
    }
}

/// Supplies fresh, typed and timestamped property records.
pub trait PropValuePool {
    fn obtain(&self, value_type: ValueType) -> PropertyValue;
}

/// Receives decoded property updates.
pub trait VehicleClient {
    /// `update_status` is false for sensor originated change notifications.
    fn set_property(&self, value: &PropertyValue, update_status: bool);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ValuePool;

impl PropValuePool for ValuePool {
    fn obtain(&self, value_type: ValueType) -> PropertyValue {
        let mut value = PropertyValue::new(value_type);
        value.timestamp = epoch_nanos();
        value
    }
}

fn epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(1)
}
