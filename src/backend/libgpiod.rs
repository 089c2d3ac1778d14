use log::debug;
use std::path::{Path, PathBuf};

use libgpiod::{chip::Chip, line, request};

use crate::backend::LineBackend;
use crate::error::AppError;
use crate::pins::{Direction, PinBits, PinGroup};

/// Batched line requests on a GPIO character device. One request covers all
/// pins of a group.
pub struct LibgpiodBackend {
    chip: PathBuf,
}

/// `offsets[i]` is the line behind bit `i` of the group's [`PinBits`].
pub struct LineRequest {
    request: request::Request,
    offsets: Vec<u32>,
}

impl LibgpiodBackend {
    pub fn new<P: AsRef<Path>>(chip: P) -> Result<Self, AppError> {
        let chip = chip.as_ref().to_path_buf();
        // fail early when the device is missing rather than on every group
        Self::open_chip(&chip)?;
        Ok(Self { chip })
    }

    fn open_chip(path: &Path) -> Result<Chip, AppError> {
        Chip::open(&path).map_err(|e| AppError::Gpio(format!("open chip {}: {e}", path.display())))
    }

    fn make_line_settings(direction: Direction) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;

        match direction {
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                ls.set_bias(Some(line::Bias::PullDown))
                    .map_err(|e| AppError::Gpio(format!("set bias: {e}")))?;
            }
            Direction::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| AppError::Gpio(format!("set drive: {e}")))?;
                ls.set_output_value(line::Value::InActive)
                    .map_err(|e| AppError::Gpio(format!("set output value: {e}")))?;
            }
        }

        Ok(ls)
    }

    fn make_line_config(offsets: &[u32], settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(offsets, settings)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

impl LineBackend for LibgpiodBackend {
    type Handle = LineRequest;

    fn name(&self) -> &'static str {
        "libgpiod"
    }

    fn acquire(&self, group: &PinGroup) -> Result<LineRequest, AppError> {
        let settings = Self::make_line_settings(group.direction())?;
        let line_cfg = Self::make_line_config(&group.pins, settings)?;

        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;

        let chip = Self::open_chip(&self.chip)?;
        let request = chip
            .request_lines(Some(&req_cfg), &line_cfg)
            .map_err(|e| AppError::Acquire(format!("request lines {:?}: {e}", group.pins)))?;

        debug!("requested lines {:?} on {}", group.pins, self.chip.display());

        Ok(LineRequest {
            request,
            offsets: group.pins.clone(),
        })
    }

    fn read_bits(&self, handle: &mut LineRequest) -> Result<PinBits, AppError> {
        let values = handle
            .request
            .values_subset(&handle.offsets)
            .map_err(|e| AppError::Io(format!("get values {:?}: {e}", handle.offsets)))?;

        let mut bits = PinBits::new(handle.offsets.len());
        for (pos, offset) in handle.offsets.iter().enumerate() {
            let value = values.get(u64::from(*offset)).ok_or_else(|| {
                AppError::Io(format!("line {offset} missing from get values result"))
            })?;
            bits.set(pos, matches!(value, line::Value::Active));
        }
        Ok(bits)
    }

    fn write_bits(&self, handle: &mut LineRequest, bits: PinBits) -> Result<(), AppError> {
        let mut values = line::ValueMap::new();
        for (pos, offset) in handle.offsets.iter().enumerate() {
            let value = if bits.get(pos) {
                line::Value::Active
            } else {
                line::Value::InActive
            };
            values.insert(u64::from(*offset), value);
        }

        handle
            .request
            .set_values_subset(values)
            .map_err(|e| AppError::Io(format!("set values {:?}: {e}", handle.offsets)))?;
        Ok(())
    }
}
