//! Per-model firmware requirements (spec.md §4.4) and serial validation.

use crate::node::PiModel;

/// Length of a valid Pi serial number.
pub const SERIAL_LEN: usize = 8;

/// Firmware/DTB requirements for one Pi hardware model.
#[derive(Debug, Clone, Copy)]
pub struct PiModelConfig {
    /// Firmware files that must be symlinked from the shared firmware
    /// directory (excluding the DTB, which is looked up separately).
    pub firmware_files: &'static [&'static str],
    /// Device tree blob filename for this model.
    pub dtb: &'static str,
    /// Whether the kernel should run in 64-bit mode.
    pub arm_64bit: bool,
}

/// Look up the firmware/DTB requirements for `model`.
#[must_use]
pub fn model_config(model: PiModel) -> PiModelConfig {
    match model {
        PiModel::Pi3 => PiModelConfig {
            firmware_files: &["bootcode.bin", "start.elf", "fixup.dat"],
            dtb: "bcm2710-rpi-3-b.dtb",
            arm_64bit: true,
        },
        PiModel::Pi3BPlus => PiModelConfig {
            firmware_files: &["bootcode.bin", "start.elf", "fixup.dat"],
            dtb: "bcm2710-rpi-3-b-plus.dtb",
            arm_64bit: true,
        },
        PiModel::Cm3 => PiModelConfig {
            firmware_files: &["bootcode.bin", "start.elf", "fixup.dat"],
            dtb: "bcm2710-rpi-cm3.dtb",
            arm_64bit: true,
        },
        PiModel::Pi4 => PiModelConfig {
            firmware_files: &["start4.elf", "fixup4.dat"],
            dtb: "bcm2711-rpi-4-b.dtb",
            arm_64bit: true,
        },
        PiModel::Pi5 => PiModelConfig {
            firmware_files: &["start4.elf", "fixup4.dat"],
            dtb: "bcm2712-rpi-5-b.dtb",
            arm_64bit: true,
        },
    }
}

/// Validate a Pi serial number: eight lowercase hex characters after
/// lowercasing. This is the only defence against path traversal into the
/// nodes root (spec.md §4.4).
#[must_use]
pub fn validate_serial(serial: &str) -> bool {
    let lowered = serial.to_ascii_lowercase();
    lowered.len() == SERIAL_LEN && lowered.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
