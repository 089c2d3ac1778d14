use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::property::{PropertyValue, ScalarValue, ValueType, areas, ids};

/// Kernel limit on lines per request.
pub const MAX_GROUP_PINS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

/// Pin states of one group. Bit `i` is the `i`-th pin of the group, not the
/// physical pin number.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PinBits {
    bits: u64,
    len: usize,
}

impl PinBits {
    pub fn new(len: usize) -> Self {
        debug_assert!(len <= MAX_GROUP_PINS);
        Self { bits: 0, len }
    }

    pub fn from_states(states: &[bool]) -> Self {
        let mut bits = Self::new(states.len());
        for (i, state) in states.iter().enumerate() {
            bits.set(i, *state);
        }
        bits
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, pos: usize) -> bool {
        pos < self.len && self.bits & (1 << pos) != 0
    }

    pub fn set(&mut self, pos: usize, active: bool) {
        if pos >= self.len {
            return;
        }
        if active {
            self.bits |= 1 << pos;
        } else {
            self.bits &= !(1 << pos);
        }
    }

    /// Mask with one bit per participating pin.
    pub fn mask(&self) -> u64 {
        if self.len >= 64 {
            u64::MAX
        } else {
            (1u64 << self.len) - 1
        }
    }

    pub fn word(&self) -> u64 {
        self.bits
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |pos| self.get(pos))
    }
}

impl fmt::Debug for PinBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinBits(")?;
        for state in self.iter() {
            write!(f, "{}", if state { '1' } else { '0' })?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityLevel {
    /// Position of the pin within the group.
    pub pin: usize,
    pub value: ScalarValue,
}

/// Maps the pin states of an input group to a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Decoder {
    /// Single pin: `active` when high, `inactive` when low.
    Level {
        active: ScalarValue,
        inactive: ScalarValue,
    },
    /// Pins are tested in `order`; the first active one decides the value.
    /// `fallback` applies when none is active.
    Priority {
        order: Vec<PriorityLevel>,
        fallback: ScalarValue,
    },
}

impl Decoder {
    pub fn decode(&self, states: &PinBits) -> ScalarValue {
        match self {
            Decoder::Level { active, inactive } => {
                if states.get(0) {
                    *active
                } else {
                    *inactive
                }
            }
            Decoder::Priority { order, fallback } => order
                .iter()
                .find(|level| states.get(level.pin))
                .map(|level| level.value)
                .unwrap_or(*fallback),
        }
    }

    fn validate(&self, pins: usize, value_type: ValueType) -> Result<(), String> {
        match self {
            Decoder::Level { active, inactive } => {
                if pins != 1 {
                    return Err(format!("level decoder needs exactly one pin, got {pins}"));
                }
                check_type(active, value_type)?;
                check_type(inactive, value_type)
            }
            Decoder::Priority { order, fallback } => {
                check_type(fallback, value_type)?;
                let mut seen = HashSet::new();
                for level in order {
                    if level.pin >= pins {
                        return Err(format!(
                            "priority position {} out of range for {pins} pins",
                            level.pin
                        ));
                    }
                    if !seen.insert(level.pin) {
                        return Err(format!("priority position {} listed twice", level.pin));
                    }
                    check_type(&level.value, value_type)?;
                }
                if seen.len() != pins {
                    return Err(format!(
                        "priority order covers {} of {pins} pins",
                        seen.len()
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Maps a scalar written by a client to the state of an output pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Encoder {
    Equals { value: ScalarValue },
    NonZero,
}

impl Encoder {
    pub fn encode(&self, scalar: ScalarValue) -> bool {
        match self {
            Encoder::Equals { value } => scalar == *value,
            Encoder::NonZero => !scalar.is_zero(),
        }
    }
}

fn check_type(value: &ScalarValue, expected: ValueType) -> Result<(), String> {
    if value.value_type() == expected {
        Ok(())
    } else {
        Err(format!(
            "{value:?} does not match value type {expected:?}"
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "kebab-case")]
pub enum Policy {
    Input { decoder: Decoder },
    Output { encoder: Encoder },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinGroup {
    pub property: i32,
    pub pins: Vec<u32>,
    pub value_type: ValueType,
    #[serde(default)]
    pub area_id: Option<i32>,
    #[serde(flatten)]
    pub policy: Policy,
}

impl PinGroup {
    pub fn input(
        property: i32,
        pins: Vec<u32>,
        value_type: ValueType,
        area_id: Option<i32>,
        decoder: Decoder,
    ) -> Self {
        Self {
            property,
            pins,
            value_type,
            area_id,
            policy: Policy::Input { decoder },
        }
    }

    pub fn output(
        property: i32,
        pin: u32,
        value_type: ValueType,
        area_id: Option<i32>,
        encoder: Encoder,
    ) -> Self {
        Self {
            property,
            pins: vec![pin],
            value_type,
            area_id,
            policy: Policy::Output { encoder },
        }
    }

    pub fn direction(&self) -> Direction {
        match self.policy {
            Policy::Input { .. } => Direction::Input,
            Policy::Output { .. } => Direction::Output,
        }
    }

    /// Fills `value` from the observed pin states. `None` for output groups.
    pub fn decode(&self, states: &PinBits, mut value: PropertyValue) -> Option<PropertyValue> {
        let Policy::Input { decoder } = &self.policy else {
            return None;
        };
        value.prop = self.property;
        value.area_id = self.area_id.unwrap_or(areas::GLOBAL);
        value.set_scalar(decoder.decode(states));
        Some(value)
    }

    /// Pin state to assert for `value`. `None` for input groups or when the
    /// record carries no scalar of the group's type.
    pub fn encode(&self, value: &PropertyValue) -> Option<bool> {
        let Policy::Output { encoder } = &self.policy else {
            return None;
        };
        value
            .scalar(self.value_type)
            .map(|scalar| encoder.encode(scalar))
    }

    fn validate(&self) -> Result<(), String> {
        if self.pins.is_empty() {
            return Err("group has no pins".into());
        }
        if self.pins.len() > MAX_GROUP_PINS {
            return Err(format!(
                "group has {} pins, at most {MAX_GROUP_PINS} supported",
                self.pins.len()
            ));
        }
        match &self.policy {
            Policy::Input { decoder } => decoder.validate(self.pins.len(), self.value_type),
            Policy::Output { encoder } => {
                if self.pins.len() != 1 {
                    return Err(format!(
                        "output group needs exactly one pin, got {}",
                        self.pins.len()
                    ));
                }
                match encoder {
                    Encoder::Equals { value } => check_type(value, self.value_type),
                    Encoder::NonZero => Ok(()),
                }
            }
        }
    }
}

/// Immutable, validated list of pin groups in acquisition order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PinTable {
    groups: Vec<PinGroup>,
}

impl PinTable {
    pub fn new(groups: Vec<PinGroup>) -> Result<Self, AppError> {
        let mut claimed = HashSet::new();
        let mut properties = HashSet::new();

        for group in &groups {
            group.validate().map_err(|e| {
                AppError::Config(format!("group for property {:#x}: {e}", group.property))
            })?;

            if !properties.insert((group.property, group.direction())) {
                return Err(AppError::Config(format!(
                    "property {:#x} mapped twice as {:?}",
                    group.property,
                    group.direction()
                )));
            }
            for pin in &group.pins {
                if !claimed.insert(*pin) {
                    return Err(AppError::Config(format!("pin {pin} claimed twice")));
                }
            }
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[PinGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// True if any group, input or output, carries `property`.
    pub fn contains(&self, property: i32) -> bool {
        self.groups.iter().any(|g| g.property == property)
    }

    pub fn input(&self, property: i32) -> Option<(usize, &PinGroup)> {
        self.find(property, Direction::Input)
    }

    pub fn output(&self, property: i32) -> Option<(usize, &PinGroup)> {
        self.find(property, Direction::Output)
    }

    fn find(&self, property: i32, direction: Direction) -> Option<(usize, &PinGroup)> {
        self.groups
            .iter()
            .enumerate()
            .find(|(_, g)| g.property == property && g.direction() == direction)
    }

    /// Pin table of the reference vehicle harness.
    pub fn vehicle_default() -> Self {
        use ScalarValue::{Float, Int32};

        let level = |pin, value| PriorityLevel { pin, value };

        Self {
            groups: vec![
                PinGroup::input(
                    ids::NIGHT_MODE,
                    vec![26],
                    ValueType::Int32,
                    None,
                    Decoder::Level {
                        active: Int32(1),
                        inactive: Int32(0),
                    },
                ),
                PinGroup::output(
                    ids::HVAC_AC_ON,
                    19,
                    ValueType::Int32,
                    Some(areas::HVAC_ALL),
                    Encoder::Equals { value: Int32(1) },
                ),
                // switch positions A, B, C; the highest position wins
                PinGroup::input(
                    ids::HVAC_FAN_SPEED,
                    vec![16, 20, 21],
                    ValueType::Int32,
                    Some(areas::HVAC_ALL),
                    Decoder::Priority {
                        order: vec![level(2, Int32(4)), level(1, Int32(3)), level(0, Int32(2))],
                        fallback: Int32(1),
                    },
                ),
                // tested least significant first
                PinGroup::input(
                    ids::HVAC_SEAT_TEMPERATURE,
                    vec![5, 6],
                    ValueType::Int32,
                    Some(areas::SEAT_DRIVER),
                    Decoder::Priority {
                        order: vec![level(0, Int32(1)), level(1, Int32(2))],
                        fallback: Int32(0),
                    },
                ),
                PinGroup::input(
                    ids::HVAC_TEMPERATURE_SET,
                    vec![12, 13],
                    ValueType::Float,
                    Some(areas::SEAT_DRIVER),
                    Decoder::Priority {
                        order: vec![level(1, Float(24.0)), level(0, Float(21.0))],
                        fallback: Float(18.0),
                    },
                ),
                PinGroup::output(
                    ids::HVAC_RECIRC_ON,
                    27,
                    ValueType::Int32,
                    Some(areas::HVAC_ALL),
                    Encoder::NonZero,
                ),
            ],
        }
    }
}

impl<'de> Deserialize<'de> for PinTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let groups = Vec::<PinGroup>::deserialize(deserializer)?;
        PinTable::new(groups).map_err(serde::de::Error::custom)
    }
}

impl Default for PinTable {
    fn default() -> Self {
        Self::vehicle_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_index_by_group_position() {
        let bits = PinBits::from_states(&[false, true, true]);
        assert_eq!(bits.word(), 0b110);
        assert_eq!(bits.mask(), 0b111);
        assert!(!bits.get(0));
        assert!(bits.get(2));
        assert!(!bits.get(3));
        assert_eq!(format!("{bits:?}"), "PinBits(011)");
    }

    #[test]
    fn set_out_of_range_is_ignored() {
        let mut bits = PinBits::new(2);
        bits.set(5, true);
        assert_eq!(bits.word(), 0);
        bits.set(1, true);
        bits.set(1, false);
        assert_eq!(bits.word(), 0);
    }

    #[test]
    fn full_width_mask() {
        assert_eq!(PinBits::new(64).mask(), u64::MAX);
        assert_eq!(PinBits::new(0).mask(), 0);
    }

    #[test]
    fn vehicle_default_passes_validation() {
        let table = PinTable::vehicle_default();
        assert_eq!(PinTable::new(table.groups().to_vec()).unwrap(), table);
    }
}
