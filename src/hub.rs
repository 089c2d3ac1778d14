use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::property::{PropertyValue, VehicleClient};

/// Client side of the engine inside the service: remembers the latest value
/// per (property, area) and broadcasts every update to subscribers.
pub struct PropertyHub {
    update_tx: broadcast::Sender<PropertyValue>,
    latest: RwLock<FxHashMap<(i32, i32), PropertyValue>>,
}

impl PropertyHub {
    pub fn new(capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            update_tx,
            latest: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropertyValue> {
        self.update_tx.subscribe()
    }

    pub fn latest(&self, property: i32) -> Vec<PropertyValue> {
        let mut values: Vec<PropertyValue> = self
            .latest
            .read()
            .values()
            .filter(|v| v.prop == property)
            .cloned()
            .collect();
        values.sort_by_key(|v| v.area_id);
        values
    }

    pub fn snapshot(&self) -> Vec<PropertyValue> {
        let mut values: Vec<PropertyValue> = self.latest.read().values().cloned().collect();
        values.sort_by_key(|v| (v.prop, v.area_id));
        values
    }
}

impl VehicleClient for PropertyHub {
    fn set_property(&self, value: &PropertyValue, _update_status: bool) {
        self.latest
            .write()
            .insert((value.prop, value.area_id), value.clone());
        // no subscribers is not an error
        let _ = self.update_tx.send(value.clone());
    }
}
