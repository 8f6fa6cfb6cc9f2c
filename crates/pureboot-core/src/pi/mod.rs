//! Raspberry Pi TFTP layout management (spec.md §4.4).

pub mod layout_manager;
pub mod models;

pub use layout_manager::{PiDiscoveryManager, PiManager};
pub use models::{model_config, validate_serial, PiModelConfig, SERIAL_LEN};
