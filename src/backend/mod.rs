#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;
pub mod sysfs;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::MockLineBackend;
pub use sysfs::SysfsBackend;

use crate::error::AppError;
use crate::pins::{PinBits, PinGroup};

/// Kernel access strategy. One implementation is chosen at startup.
///
/// Handles are owned by exactly one group and release their pins when
/// dropped.
pub trait LineBackend: Send + 'static {
    type Handle: Send;

    fn name(&self) -> &'static str;

    /// Claims every pin of `group` with the group's direction. Inputs are
    /// pulled down where the kernel interface supports bias.
    fn acquire(&self, group: &PinGroup) -> Result<Self::Handle, AppError>;

    fn read_bits(&self, handle: &mut Self::Handle) -> Result<PinBits, AppError>;

    fn write_bits(&self, handle: &mut Self::Handle, bits: PinBits) -> Result<(), AppError>;
}
