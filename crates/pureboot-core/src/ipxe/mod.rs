//! iPXE script generation and TFTP-root script sync (spec.md §4.3).

pub mod script_generator;

pub use script_generator::{IpxeScriptGenerator, update_tftp_boot_scripts};
