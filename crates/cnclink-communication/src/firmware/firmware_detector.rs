//! Firmware family detection from welcome banners and `$I` build info
//!
//! Typical banners:
//! - `Grbl 1.1h ['$' for help]`
//! - `GrblHAL 1.1f ['$' or '$HELP' for help]`
//! - `Grbl 3.7.10 [FluidNC v3.7.10 (wifi) '$' for help]`

use cnclink_core::{Firmware, FirmwareInfo};

/// Classify text from a banner, `[VER:...]` or `[FIRMWARE:...]` line
///
/// FluidNC identifies itself as `Grbl` first, so it is checked before the
/// plain prefix match.
pub fn detect_firmware(text: &str) -> Option<Firmware> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("fluidnc") {
        Some(Firmware::FluidNc)
    } else if lower.contains("grblhal") {
        Some(Firmware::GrblHal)
    } else if lower.trim_start().starts_with("grbl") || lower.starts_with("[ver:") {
        Some(Firmware::Grbl)
    } else {
        None
    }
}

/// Whether a line is a welcome banner (printed on boot and after reset)
pub fn is_banner(line: &str) -> bool {
    let lower = line.trim_start().to_ascii_lowercase();
    (lower.starts_with("grbl ") || lower.starts_with("grblhal ")) && line.contains('[')
}

/// Version string from a banner
pub fn banner_version(banner: &str, firmware: Firmware) -> String {
    match firmware {
        Firmware::FluidNc => banner
            .split_whitespace()
            .skip_while(|word| !word.eq_ignore_ascii_case("fluidnc"))
            .nth(1)
            .map(|v| v.trim_start_matches('v').to_string())
            .unwrap_or_default(),
        Firmware::Grbl | Firmware::GrblHal => banner
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Build a [`FirmwareInfo`] from a banner line
pub fn info_from_banner(banner: &str) -> Option<FirmwareInfo> {
    if !is_banner(banner) {
        return None;
    }
    let firmware = detect_firmware(banner)?;
    Some(FirmwareInfo {
        firmware,
        version: banner_version(banner, firmware),
        banner: banner.trim().to_string(),
        options: String::new(),
        rx_buffer: None,
    })
}

/// Fold `[VER:...]` content into `info`
///
/// grblHAL and FluidNC name themselves in the version field; plain GRBL
/// prints only a dated version number.
pub fn apply_version(info: &mut FirmwareInfo, version: &str) {
    let number = version.split(':').next().unwrap_or_default().trim();
    if let Some(firmware) = detect_firmware(version).filter(|f| *f != Firmware::Grbl) {
        info.firmware = firmware;
    }
    if info.version.is_empty() {
        info.version = number
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
    }
}

/// Fold `[OPT:letters,blocks,rx]` content into `info`
pub fn apply_options(info: &mut FirmwareInfo, options: &str) {
    let mut parts = options.split(',');
    info.options = parts.next().unwrap_or_default().trim().to_string();
    let _planner_blocks = parts.next();
    info.rx_buffer = parts.next().and_then(|rx| rx.trim().parse().ok());
}
