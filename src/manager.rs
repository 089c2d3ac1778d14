use log::{debug, error, info, warn};
use std::sync::Arc;

use serde::Serialize;

use crate::backend::LineBackend;
use crate::error::AppError;
use crate::pins::{Direction, PinBits, PinGroup, PinTable, Policy};
use crate::property::{PropValuePool, PropertyValue, VehicleClient, areas};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupState {
    Unacquired,
    Readable,
    Writable,
    /// Terminal: acquisition or I/O failed.
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupDescriptor {
    #[serde(flatten)]
    pub group: PinGroup,
    pub state: GroupState,
}

struct GroupSlot<H> {
    state: GroupState,
    handle: Option<H>,
}

impl<H> GroupSlot<H> {
    fn degrade(&mut self) {
        self.state = GroupState::Unavailable;
        self.handle = None;
    }
}

/// Owns the hardware handles of every group in a [`PinTable`].
///
/// Not internally synchronized: callers sharing a manager across threads must
/// serialize `read_all`, `get` and `write` themselves.
pub struct LineManager<B: LineBackend> {
    table: Arc<PinTable>,
    backend: B,
    slots: Vec<GroupSlot<B::Handle>>,
}

impl<B: LineBackend> LineManager<B> {
    /// Acquires every group in table order. A group that cannot be acquired
    /// is marked unavailable; the rest of the table is still acquired.
    pub fn new(table: Arc<PinTable>, backend: B) -> Self {
        info!(
            "acquiring {} pin groups with {} backend",
            table.len(),
            backend.name()
        );

        let mut slots: Vec<GroupSlot<B::Handle>> = table
            .groups()
            .iter()
            .map(|_| GroupSlot {
                state: GroupState::Unacquired,
                handle: None,
            })
            .collect();

        for (group, slot) in table.groups().iter().zip(slots.iter_mut()) {
            match backend.acquire(group) {
                Ok(handle) => {
                    slot.handle = Some(handle);
                    slot.state = match group.direction() {
                        Direction::Input => GroupState::Readable,
                        Direction::Output => GroupState::Writable,
                    };
                    debug!(
                        "property {:#x} acquired pins {:?}",
                        group.property, group.pins
                    );
                }
                Err(e) => {
                    error!(
                        "property {:#x} unavailable, pins {:?}: {e}",
                        group.property, group.pins
                    );
                    slot.state = GroupState::Unavailable;
                }
            }
        }

        Self {
            table,
            backend,
            slots,
        }
    }

    pub fn table(&self) -> &Arc<PinTable> {
        &self.table
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// True if any group, input or output, carries `property`.
    pub fn is_handled(&self, property: i32) -> bool {
        self.table.contains(property)
    }

    /// True if an input group carries `property`.
    pub fn is_readable(&self, property: i32) -> bool {
        self.table.input(property).is_some()
    }

    pub fn groups(&self) -> Vec<GroupDescriptor> {
        self.table
            .groups()
            .iter()
            .zip(&self.slots)
            .map(|(group, slot)| GroupDescriptor {
                group: group.clone(),
                state: slot.state,
            })
            .collect()
    }

    pub fn state(&self, property: i32, direction: Direction) -> Option<GroupState> {
        self.table
            .groups()
            .iter()
            .position(|g| g.property == property && g.direction() == direction)
            .map(|idx| self.slots[idx].state)
    }

    /// Reads every input group and forwards the decoded values to `client`
    /// as sensor updates. Failing groups are logged and skipped.
    pub fn read_all(&mut self, pool: &dyn PropValuePool, client: &dyn VehicleClient) {
        for idx in 0..self.slots.len() {
            if self.table.groups()[idx].direction() != Direction::Input {
                continue;
            }
            match self.read_group(idx, pool) {
                Ok(value) => client.set_property(&value, false),
                Err(AppError::Unavailable(_)) => {}
                Err(e) => warn!("skipping property {:#x}: {e}", self.table.groups()[idx].property),
            }
        }
    }

    /// Reads one input group on demand.
    pub fn get(
        &mut self,
        property: i32,
        pool: &dyn PropValuePool,
    ) -> Result<PropertyValue, AppError> {
        let (idx, _) = self
            .table
            .input(property)
            .ok_or(AppError::NotHandled(property))?;
        self.read_group(idx, pool)
    }

    /// Drives the output group carrying the value's property and area.
    /// Unknown properties or areas and degraded groups leave every pin
    /// untouched.
    pub fn write(&mut self, value: &PropertyValue) -> Result<(), AppError> {
        let Some((idx, group)) = self.table.output(value.prop) else {
            debug!("no output group for property {:#x}", value.prop);
            return Err(AppError::NotHandled(value.prop));
        };
        if value.area_id != group.area_id.unwrap_or(areas::GLOBAL) {
            debug!(
                "property {:#x} has no output for area {:#x}",
                value.prop, value.area_id
            );
            return Err(AppError::NotHandled(value.prop));
        }

        let active = group.encode(value).ok_or_else(|| {
            AppError::InvalidValue(format!(
                "property {:#x} expects a {:?} value",
                value.prop, group.value_type
            ))
        })?;
        let pin = group.pins[0];

        let slot = &mut self.slots[idx];
        let handle = slot
            .handle
            .as_mut()
            .ok_or(AppError::Unavailable(value.prop))?;

        let bits = PinBits::from_states(&[active]);
        match self.backend.write_bits(handle, bits) {
            Ok(()) => {
                info!("property {:#x} wrote {} to pin {pin}", value.prop, active as u8);
                Ok(())
            }
            Err(e) => {
                warn!("property {:#x} degraded after write failure: {e}", value.prop);
                slot.degrade();
                Err(e)
            }
        }
    }

    fn read_group(
        &mut self,
        idx: usize,
        pool: &dyn PropValuePool,
    ) -> Result<PropertyValue, AppError> {
        let group = &self.table.groups()[idx];
        let Policy::Input { .. } = group.policy else {
            return Err(AppError::InvalidValue(format!(
                "property {:#x} is output only",
                group.property
            )));
        };

        let slot = &mut self.slots[idx];
        let handle = slot
            .handle
            .as_mut()
            .ok_or(AppError::Unavailable(group.property))?;

        let states = match self.backend.read_bits(handle) {
            Ok(states) => states,
            Err(e) => {
                warn!(
                    "property {:#x} degraded after read failure",
                    group.property
                );
                slot.degrade();
                return Err(e);
            }
        };
        debug!("property {:#x} pins {states:?}", group.property);

        let value = pool.obtain(group.value_type);
        group
            .decode(&states, value)
            .ok_or_else(|| AppError::Gpio(format!("property {:#x} has no decoder", group.property)))
    }
}

impl<B: LineBackend> Drop for LineManager<B> {
    fn drop(&mut self) {
        let held = self.slots.iter().filter(|s| s.handle.is_some()).count();
        info!("releasing {held} pin groups");
        self.slots.clear();
    }
}
