pub mod backend;
pub mod config;
pub mod error;
pub mod hub;
pub mod manager;
pub mod pins;
pub mod property;
pub mod routes;

pub use config::{AppConfig, BackendConfig, HttpConfig};
pub use error::AppError;
pub use hub::PropertyHub;
pub use manager::{GroupDescriptor, GroupState, LineManager};
pub use pins::{Decoder, Direction, Encoder, PinBits, PinGroup, PinTable, Policy, PriorityLevel};
pub use property::{
    PropValuePool, PropertyValue, RawValue, ScalarValue, ValuePool, ValueType, VehicleClient,
};
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{LineBackend, MockLineBackend, SysfsBackend};
