use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::backend::LineBackend;
use crate::error::AppError;
use crate::pins::{Direction, PinBits, PinGroup};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Legacy per-pin file protocol under `/sys/class/gpio`.
pub struct SysfsBackend {
    root: PathBuf,
}

struct SysfsPin {
    number: u32,
    value: File,
}

/// One open value file per pin, in group order. Dropping unexports every pin
/// that was exported, including ones whose setup failed afterwards.
pub struct SysfsHandle {
    root: PathBuf,
    exported: Vec<u32>,
    pins: Vec<SysfsPin>,
}

impl Drop for SysfsHandle {
    fn drop(&mut self) {
        for number in &self.exported {
            if let Err(e) = write_control(&self.root.join("unexport"), &number.to_string()) {
                warn!("unexport gpio{number}: {e}");
            }
        }
    }
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&self, pin: u32) -> Result<(), AppError> {
        match write_control(&self.root.join("export"), &pin.to_string()) {
            Ok(()) => Ok(()),
            Err(e) if already_exported(&e, self.pin_dir(pin).is_dir()) => {
                warn!("gpio{pin} left exported by a previous owner, reusing it");
                Ok(())
            }
            Err(e) => Err(AppError::Acquire(format!("export gpio{pin}: {e}"))),
        }
    }

    fn open_value(&self, pin: u32, direction: Direction) -> Result<File, AppError> {
        let dir = self.pin_dir(pin);
        let mode = match direction {
            Direction::Input => "in",
            Direction::Output => "out",
        };
        write_control(&dir.join("direction"), mode)
            .map_err(|e| AppError::Acquire(format!("set direction of gpio{pin}: {e}")))?;

        let path = dir.join("value");
        OpenOptions::new()
            .read(true)
            .write(direction == Direction::Output)
            .open(&path)
            .map_err(|e| AppError::Acquire(format!("open {}: {e}", path.display())))
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBackend for SysfsBackend {
    type Handle = SysfsHandle;

    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn acquire(&self, group: &PinGroup) -> Result<SysfsHandle, AppError> {
        let direction = group.direction();
        if direction == Direction::Input {
            debug!("sysfs cannot set bias, pins {:?} keep board defaults", group.pins);
        }

        // exported pins are released by drop if any later step fails
        let mut handle = SysfsHandle {
            root: self.root.clone(),
            exported: Vec::with_capacity(group.pins.len()),
            pins: Vec::with_capacity(group.pins.len()),
        };
        for &number in &group.pins {
            self.export(number)?;
            handle.exported.push(number);
            let value = self.open_value(number, direction)?;
            handle.pins.push(SysfsPin { number, value });
        }

        Ok(handle)
    }

    fn read_bits(&self, handle: &mut SysfsHandle) -> Result<PinBits, AppError> {
        let mut bits = PinBits::new(handle.pins.len());

        for (pos, pin) in handle.pins.iter_mut().enumerate() {
            pin.value
                .seek(SeekFrom::Start(0))
                .map_err(|e| AppError::Io(format!("rewind gpio{}: {e}", pin.number)))?;

            let mut ascii = [0u8; 1];
            let n = pin
                .value
                .read(&mut ascii)
                .map_err(|e| AppError::Io(format!("read gpio{}: {e}", pin.number)))?;
            if n == 0 {
                return Err(AppError::Io(format!("read gpio{}: empty value", pin.number)));
            }

            let high = match ascii[0] {
                b'1' => true,
                b'0' => false,
                other => {
                    return Err(AppError::Io(format!(
                        "read gpio{}: unexpected byte {other:#04x}",
                        pin.number
                    )));
                }
            };
            debug!("gpio{} reads {}", pin.number, ascii[0] as char);
            bits.set(pos, high);
        }

        Ok(bits)
    }

    fn write_bits(&self, handle: &mut SysfsHandle, bits: PinBits) -> Result<(), AppError> {
        for (pos, pin) in handle.pins.iter_mut().enumerate() {
            let ascii: &[u8] = if bits.get(pos) { b"1" } else { b"0" };
            pin.value
                .seek(SeekFrom::Start(0))
                .and_then(|_| pin.value.write_all(ascii))
                .and_then(|_| pin.value.flush())
                .map_err(|e| AppError::Io(format!("write gpio{}: {e}", pin.number)))?;
            debug!("gpio{} set to {}", pin.number, ascii[0] as char);
        }
        Ok(())
    }
}

/// The kernel answers EBUSY when the pin is already exported, typically
/// after a previous run died without unexporting.
fn already_exported(err: &io::Error, pin_dir_exists: bool) -> bool {
    err.kind() == ErrorKind::ResourceBusy && pin_dir_exists
}

fn write_control(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EBUSY: i32 = 16;

    #[test]
    fn busy_export_reuses_existing_pin() {
        let busy = io::Error::from_raw_os_error(EBUSY);
        assert!(already_exported(&busy, true));
        assert!(!already_exported(&busy, false));
    }

    #[test]
    fn other_export_errors_fail() {
        let denied = io::Error::from(ErrorKind::PermissionDenied);
        assert!(!already_exported(&denied, true));
    }
}
