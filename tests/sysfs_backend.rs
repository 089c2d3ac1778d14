use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use gpio_vhal::property::{areas, ids};
use gpio_vhal::{
    Direction, GroupState, LineBackend, LineManager, PinBits, PinTable, PropertyValue,
    SysfsBackend, ValuePool, ValueType, VehicleClient,
};

/// Fake `/sys/class/gpio`: control files plus a pre-exported directory for
/// every pin in `pins`.
fn fake_sysfs(pins: &[u32]) -> TempDir {
    let root = tempfile::tempdir().expect("tempdir");
    fs::write(root.path().join("export"), "").unwrap();
    fs::write(root.path().join("unexport"), "").unwrap();
    for pin in pins {
        let dir = root.path().join(format!("gpio{pin}"));
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("direction"), "").unwrap();
        fs::write(dir.join("value"), "0").unwrap();
    }
    root
}

fn set_value(root: &Path, pin: u32, ascii: &str) {
    fs::write(root.join(format!("gpio{pin}/value")), ascii).unwrap();
}

fn read_file(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[derive(Default)]
struct RecordingClient {
    updates: Mutex<Vec<PropertyValue>>,
}

impl VehicleClient for RecordingClient {
    fn set_property(&self, value: &PropertyValue, _update_status: bool) {
        self.updates.lock().push(value.clone());
    }
}

const ALL_PINS: [u32; 10] = [26, 19, 16, 20, 21, 5, 6, 12, 13, 27];

#[test]
fn acquisition_writes_export_and_direction() {
    let root = fake_sysfs(&ALL_PINS);
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());

    let (_, night_mode) = table.input(ids::NIGHT_MODE).unwrap();
    let handle = backend.acquire(night_mode).unwrap();
    assert_eq!(read_file(root.path(), "export"), "26");
    assert_eq!(read_file(root.path(), "gpio26/direction"), "in");

    drop(handle);
    assert_eq!(read_file(root.path(), "unexport"), "26");

    let (_, ac) = table.output(ids::HVAC_AC_ON).unwrap();
    let _handle = backend.acquire(ac).unwrap();
    assert_eq!(read_file(root.path(), "gpio19/direction"), "out");
}

#[test]
fn reads_ascii_value_on_every_poll() {
    let root = fake_sysfs(&ALL_PINS);
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());
    let (_, fan) = table.input(ids::HVAC_FAN_SPEED).unwrap();
    let mut handle = backend.acquire(fan).unwrap();

    set_value(root.path(), 20, "1\n");
    let bits = backend.read_bits(&mut handle).unwrap();
    assert_eq!(bits, PinBits::from_states(&[false, true, false]));

    set_value(root.path(), 20, "0\n");
    set_value(root.path(), 21, "1\n");
    let bits = backend.read_bits(&mut handle).unwrap();
    assert_eq!(bits, PinBits::from_states(&[false, false, true]));
}

#[test]
fn garbage_value_is_an_io_error() {
    let root = fake_sysfs(&ALL_PINS);
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());
    let (_, night_mode) = table.input(ids::NIGHT_MODE).unwrap();
    let mut handle = backend.acquire(night_mode).unwrap();

    set_value(root.path(), 26, "x");
    assert!(backend.read_bits(&mut handle).is_err());
    set_value(root.path(), 26, "");
    assert!(backend.read_bits(&mut handle).is_err());
}

#[test]
fn writes_ascii_value() {
    let root = fake_sysfs(&ALL_PINS);
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());
    let (_, ac) = table.output(ids::HVAC_AC_ON).unwrap();
    let mut handle = backend.acquire(ac).unwrap();

    backend
        .write_bits(&mut handle, PinBits::from_states(&[true]))
        .unwrap();
    assert_eq!(read_file(root.path(), "gpio19/value"), "1");
    backend
        .write_bits(&mut handle, PinBits::from_states(&[false]))
        .unwrap();
    assert_eq!(read_file(root.path(), "gpio19/value"), "0");
}

#[test]
fn missing_pin_degrades_only_its_group() {
    let available: Vec<u32> = ALL_PINS.iter().copied().filter(|p| *p != 13).collect();
    let root = fake_sysfs(&available);
    let mut manager = LineManager::new(
        Arc::new(PinTable::vehicle_default()),
        SysfsBackend::with_root(root.path()),
    );
    let client = RecordingClient::default();

    assert_eq!(
        manager.state(ids::HVAC_TEMPERATURE_SET, Direction::Input),
        Some(GroupState::Unavailable)
    );
    assert_eq!(
        manager.state(ids::NIGHT_MODE, Direction::Input),
        Some(GroupState::Readable)
    );

    set_value(root.path(), 26, "1");
    manager.read_all(&ValuePool, &client);
    let updates = client.updates.lock();
    let night = updates.iter().find(|v| v.prop == ids::NIGHT_MODE).unwrap();
    assert_eq!(night.value.int32_values, vec![1]);
    assert!(night.timestamp > 0);
    assert!(updates.iter().all(|v| v.prop != ids::HVAC_TEMPERATURE_SET));
    drop(updates);

    let mut on = PropertyValue::new(ValueType::Int32);
    on.prop = ids::HVAC_AC_ON;
    on.area_id = areas::HVAC_ALL;
    on.value.int32_values = vec![1];
    manager.write(&on).unwrap();
    assert_eq!(read_file(root.path(), "gpio19/value"), "1");
}

#[test]
fn partial_group_is_released() {
    // gpio13 missing: pin 12 is exported first and must be unexported again
    let root = fake_sysfs(&[12]);
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());
    let (_, temperature) = table.input(ids::HVAC_TEMPERATURE_SET).unwrap();

    assert!(backend.acquire(temperature).is_err());
    assert_eq!(read_file(root.path(), "unexport"), "12");
}

#[test]
fn direction_failure_unexports_the_pin() {
    let root = fake_sysfs(&[]);
    fs::create_dir(root.path().join("gpio26")).unwrap();
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());
    let (_, night_mode) = table.input(ids::NIGHT_MODE).unwrap();

    assert!(backend.acquire(night_mode).is_err());
    assert_eq!(read_file(root.path(), "export"), "26");
    assert_eq!(read_file(root.path(), "unexport"), "26");
}

#[test]
fn export_failure_other_than_busy_is_fatal() {
    let root = fake_sysfs(&[26]);
    fs::remove_file(root.path().join("export")).unwrap();
    let table = PinTable::vehicle_default();
    let backend = SysfsBackend::with_root(root.path());
    let (_, night_mode) = table.input(ids::NIGHT_MODE).unwrap();

    assert!(backend.acquire(night_mode).is_err());
    // never exported, so nothing to undo
    assert_eq!(read_file(root.path(), "unexport"), "");
}
