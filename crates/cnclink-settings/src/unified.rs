//! Firmware-agnostic settings table
//!
//! One table over both settings dialects: numbered GRBL/grblHAL settings
//! (`$110=3000`) and FluidNC configuration paths
//! (`$/axes/x/max_rate_mm_per_min=3000`). Every entry has a stable key; its
//! firmware identity is a GRBL id, a FluidNC path, or both.
//!
//! Lines for ids or paths missing from the built-in registry are kept as
//! extension entries so that a backup never loses data.

use crate::error::{SettingsError, SettingsResult};
use cnclink_communication::firmware::grbl::utils::strip_comments;
use cnclink_core::{Firmware, FirmwareError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Version written by [`UnifiedSettingsMap::to_json`]
pub const FORMAT_VERSION: u32 = 2;

/// Display grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingCategory {
    General,
    Reporting,
    Motion,
    Limits,
    Homing,
    Spindle,
    Laser,
    Axes,
    /// Read from a device but not in the registry
    Extension,
}

impl SettingCategory {
    pub fn name(&self) -> &'static str {
        match self {
            SettingCategory::General => "General",
            SettingCategory::Reporting => "Reporting",
            SettingCategory::Motion => "Motion",
            SettingCategory::Limits => "Limits",
            SettingCategory::Homing => "Homing",
            SettingCategory::Spindle => "Spindle",
            SettingCategory::Laser => "Laser",
            SettingCategory::Axes => "Axes",
            SettingCategory::Extension => "Extension",
        }
    }
}

impl fmt::Display for SettingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value type of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingType {
    Integer,
    Float,
    Boolean,
    /// Per-axis bit mask
    Mask,
    Text,
}

/// One row of the settings table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSetting {
    /// Stable, firmware-independent key
    pub key: String,
    pub display_name: String,
    pub category: SettingCategory,
    pub units: String,
    pub setting_type: SettingType,
    /// `$N` number on GRBL and grblHAL
    pub grbl_id: Option<u16>,
    /// Configuration path on FluidNC
    pub fluidnc_path: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default_value: String,
    /// Last value read from the device, loaded, or edited
    pub value: Option<String>,
    /// Edited since the last [`UnifiedSettingsMap::mark_saved`]
    pub modified: bool,
    pub changed_from_default: bool,
}

impl UnifiedSetting {
    /// Whether the setting can be addressed on `firmware`
    pub fn available_on(&self, firmware: Firmware) -> bool {
        match firmware {
            Firmware::Grbl | Firmware::GrblHal => self.grbl_id.is_some(),
            Firmware::FluidNc => self.fluidnc_path.is_some(),
        }
    }

    pub fn is_extension(&self) -> bool {
        self.category == SettingCategory::Extension
    }

    /// Current value, falling back to the default
    pub fn current_value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.default_value)
    }

    /// Check a raw value against type and range; returns the normalised form
    ///
    /// Booleans normalise to `1`/`0`, integers and masks to whole numbers.
    pub fn validate(&self, raw: &str) -> Result<String, FirmwareError> {
        let raw = raw.trim();
        let reject = |reason: String| FirmwareError::InvalidSettingValue {
            setting: self.key.clone(),
            reason,
        };

        match self.setting_type {
            SettingType::Text => {
                if raw.is_empty() {
                    return Err(reject("value is empty".to_string()));
                }
                Ok(raw.to_string())
            }
            SettingType::Boolean => match parse_bool(raw) {
                Some(true) => Ok("1".to_string()),
                Some(false) => Ok("0".to_string()),
                None => Err(reject(format!("'{}' is not a boolean", raw))),
            },
            SettingType::Integer | SettingType::Float | SettingType::Mask => {
                let number: f64 = raw
                    .parse()
                    .ok()
                    .filter(|n: &f64| n.is_finite())
                    .ok_or_else(|| reject(format!("'{}' is not a number", raw)))?;
                if let Some(min) = self.min {
                    if number < min {
                        return Err(reject(format!("{} is below minimum {}", number, min)));
                    }
                }
                if let Some(max) = self.max {
                    if number > max {
                        return Err(reject(format!("{} is above maximum {}", number, max)));
                    }
                }
                if self.setting_type == SettingType::Float {
                    return Ok(raw.to_string());
                }
                if number.fract() != 0.0 {
                    return Err(reject(format!("{} is not a whole number", number)));
                }
                Ok(format!("{}", number as i64))
            }
        }
    }

    fn store(&mut self, value: String, modified: bool) {
        self.changed_from_default = !values_equal(&value, &self.default_value);
        self.value = Some(value);
        self.modified = modified;
    }

    fn extension(key: String, display_name: String, value: &str) -> Self {
        let setting_type = if value.trim().parse::<f64>().is_ok() {
            SettingType::Float
        } else {
            SettingType::Text
        };
        Self {
            key,
            display_name,
            category: SettingCategory::Extension,
            units: String::new(),
            setting_type,
            grbl_id: None,
            fluidnc_path: None,
            min: None,
            max: None,
            default_value: value.to_string(),
            value: None,
            modified: false,
            changed_from_default: false,
        }
    }
}

/// One differing value between two tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDiff {
    pub key: String,
    pub display_name: String,
    /// Value in this table
    pub current: Option<String>,
    /// Value in the compared table
    pub other: Option<String>,
}

/// Settings table keyed by stable key
#[derive(Debug, Clone)]
pub struct UnifiedSettingsMap {
    settings: Vec<UnifiedSetting>,
    index: HashMap<String, usize>,
}

impl Default for UnifiedSettingsMap {
    fn default() -> Self {
        Self::new()
    }
}

impl UnifiedSettingsMap {
    /// Table holding the built-in registry with no values read
    pub fn new() -> Self {
        let mut map = Self {
            settings: Vec::with_capacity(REGISTRY.len()),
            index: HashMap::new(),
        };
        for def in REGISTRY {
            map.insert(def.to_setting());
        }
        map
    }

    fn insert(&mut self, setting: UnifiedSetting) -> usize {
        let position = self.settings.len();
        self.index.insert(setting.key.clone(), position);
        self.settings.push(setting);
        position
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Settings in registry order, extensions last
    pub fn iter(&self) -> impl Iterator<Item = &UnifiedSetting> {
        self.settings.iter()
    }

    pub fn get(&self, key: &str) -> Option<&UnifiedSetting> {
        self.index.get(key).map(|&i| &self.settings[i])
    }

    pub fn get_by_grbl_id(&self, id: u16) -> Option<&UnifiedSetting> {
        self.settings.iter().find(|s| s.grbl_id == Some(id))
    }

    pub fn get_by_path(&self, path: &str) -> Option<&UnifiedSetting> {
        let path = normalize_path(path);
        self.settings
            .iter()
            .find(|s| s.fluidnc_path.as_deref() == Some(path.as_str()))
    }

    pub fn get_by_category(&self, category: SettingCategory) -> Vec<&UnifiedSetting> {
        self.settings
            .iter()
            .filter(|s| s.category == category)
            .collect()
    }

    /// Settings addressable on `firmware`
    pub fn get_visible(&self, firmware: Firmware) -> Vec<&UnifiedSetting> {
        self.settings
            .iter()
            .filter(|s| s.available_on(firmware))
            .collect()
    }

    /// Settings edited since the last save
    pub fn modified(&self) -> Vec<&UnifiedSetting> {
        self.settings.iter().filter(|s| s.modified).collect()
    }

    /// Ingest one `$N=V` line
    ///
    /// Returns the updated entry, or `None` when the line is not a numbered
    /// setting.
    pub fn parse_grbl_line(&mut self, line: &str) -> Option<&UnifiedSetting> {
        let (key, value) = split_setting_line(line)?;
        let id: u16 = key.parse().ok()?;
        let position = self.position_for_grbl_id(id, &value);
        self.settings[position].store(value, false);
        Some(&self.settings[position])
    }

    /// Ingest one `$/path=V` line; numbered lines are delegated to
    /// [`parse_grbl_line`](Self::parse_grbl_line)
    pub fn parse_fluidnc_line(&mut self, line: &str) -> Option<&UnifiedSetting> {
        let (key, value) = split_setting_line(line)?;
        if key.chars().all(|c| c.is_ascii_digit()) {
            return self.parse_grbl_line(line);
        }
        let path = normalize_path(&key);
        if path.len() < 2 {
            return None;
        }
        let position = self.position_for_path(&path, &value);
        self.settings[position].store(value, false);
        Some(&self.settings[position])
    }

    /// Ingest a settings line in the dialect of `firmware`
    pub fn parse_line(&mut self, line: &str, firmware: Firmware) -> Option<&UnifiedSetting> {
        match firmware {
            Firmware::Grbl | Firmware::GrblHal => self.parse_grbl_line(line),
            Firmware::FluidNc => self.parse_fluidnc_line(line),
        }
    }

    fn position_for_grbl_id(&mut self, id: u16, value: &str) -> usize {
        if let Some(position) = self.settings.iter().position(|s| s.grbl_id == Some(id)) {
            return position;
        }
        tracing::debug!("Adding extension setting ${}", id);
        let mut setting = UnifiedSetting::extension(format!("grbl_{}", id), format!("${}", id), value);
        setting.grbl_id = Some(id);
        self.insert(setting)
    }

    fn position_for_path(&mut self, path: &str, value: &str) -> usize {
        if let Some(position) = self
            .settings
            .iter()
            .position(|s| s.fluidnc_path.as_deref() == Some(path))
        {
            return position;
        }
        tracing::debug!("Adding extension setting {}", path);
        let key = format!("fluidnc{}", path.replace('/', "_"));
        let mut setting = UnifiedSetting::extension(key, path.to_string(), value);
        setting.fluidnc_path = Some(path.to_string());
        self.insert(setting)
    }

    /// Edit a value; marks the entry modified
    pub fn set_value(&mut self, key: &str, raw: &str) -> SettingsResult<&UnifiedSetting> {
        let &position = self
            .index
            .get(key)
            .ok_or_else(|| SettingsError::InvalidSetting {
                key: key.to_string(),
                reason: "unknown setting".to_string(),
            })?;
        let value = self.settings[position].validate(raw)?;
        self.settings[position].store(value, true);
        Ok(&self.settings[position])
    }

    /// Wire command writing `value` to `key` on `firmware`
    pub fn build_set_command(
        &self,
        key: &str,
        value: &str,
        firmware: Firmware,
    ) -> Result<String, FirmwareError> {
        let unavailable = || FirmwareError::SettingNotAvailable {
            setting: key.to_string(),
            firmware: firmware.name().to_string(),
        };
        let setting = self.get(key).ok_or_else(unavailable)?;
        let normalized = setting.validate(value)?;
        let is_bool = setting.setting_type == SettingType::Boolean;

        match firmware {
            Firmware::Grbl | Firmware::GrblHal => {
                let id = setting.grbl_id.ok_or_else(unavailable)?;
                Ok(format!("${}={}", id, normalized))
            }
            Firmware::FluidNc => {
                let path = setting.fluidnc_path.as_deref().ok_or_else(unavailable)?;
                let wire = if is_bool {
                    (if normalized == "1" { "true" } else { "false" }).to_string()
                } else {
                    normalized
                };
                Ok(format!("${}={}", path, wire))
            }
        }
    }

    /// Clear every `modified` flag
    pub fn mark_saved(&mut self) {
        for setting in &mut self.settings {
            setting.modified = false;
        }
    }

    /// Keys whose values differ from `other`
    pub fn diff(&self, other: &UnifiedSettingsMap) -> Vec<SettingDiff> {
        let mut changes = Vec::new();
        for setting in &self.settings {
            let theirs = other.get(&setting.key).and_then(|s| s.value.clone());
            if !same_value(setting.value.as_deref(), theirs.as_deref()) {
                changes.push(SettingDiff {
                    key: setting.key.clone(),
                    display_name: setting.display_name.clone(),
                    current: setting.value.clone(),
                    other: theirs,
                });
            }
        }
        for setting in &other.settings {
            if self.index.contains_key(&setting.key) || setting.value.is_none() {
                continue;
            }
            changes.push(SettingDiff {
                key: setting.key.clone(),
                display_name: setting.display_name.clone(),
                current: None,
                other: setting.value.clone(),
            });
        }
        changes
    }

    /// Serialise populated values in the keyed format
    pub fn to_json(&self) -> SettingsResult<String> {
        let settings = self
            .settings
            .iter()
            .filter_map(|s| {
                s.value.as_ref().map(|value| {
                    (
                        s.key.clone(),
                        StoredSetting {
                            value: value.clone(),
                            grbl_id: s.grbl_id,
                            fluidnc_path: s.fluidnc_path.clone(),
                        },
                    )
                })
            })
            .collect();
        let document = SettingsDocument {
            format_version: FORMAT_VERSION,
            settings,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Load the keyed format or the legacy `{"110": "3000", ...}` format
    pub fn from_json(text: &str) -> SettingsResult<Self> {
        let root: Value = serde_json::from_str(text)?;
        let mut map = Self::new();

        let Value::Object(object) = &root else {
            return Err(SettingsError::LoadError(
                "settings document is not an object".to_string(),
            ));
        };

        if object.contains_key("settings") {
            let document: SettingsDocument = serde_json::from_value(root.clone())?;
            if document.format_version > FORMAT_VERSION {
                return Err(SettingsError::LoadError(format!(
                    "unsupported settings format version {}",
                    document.format_version
                )));
            }
            for (key, stored) in document.settings {
                map.restore(key, stored);
            }
            return Ok(map);
        }

        let mut legacy = Vec::with_capacity(object.len());
        for (key, value) in object {
            let id: u16 = key.trim_start_matches('$').parse().map_err(|_| {
                SettingsError::LoadError(format!("unrecognised settings key '{}'", key))
            })?;
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
                other => {
                    return Err(SettingsError::LoadError(format!(
                        "unsupported value for ${}: {}",
                        id, other
                    )))
                }
            };
            legacy.push((id, value));
        }
        tracing::info!("Importing {} legacy numbered settings", legacy.len());
        for (id, value) in legacy {
            let position = map.position_for_grbl_id(id, &value);
            map.settings[position].store(value, false);
        }
        Ok(map)
    }

    fn restore(&mut self, key: String, stored: StoredSetting) {
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let by_identity = self.settings.iter().position(|s| {
                    (stored.grbl_id.is_some() && s.grbl_id == stored.grbl_id)
                        || (stored.fluidnc_path.is_some() && s.fluidnc_path == stored.fluidnc_path)
                });
                match by_identity {
                    Some(position) => position,
                    None => {
                        let display_name = stored
                            .fluidnc_path
                            .clone()
                            .or_else(|| stored.grbl_id.map(|id| format!("${}", id)))
                            .unwrap_or_else(|| key.clone());
                        let mut setting = UnifiedSetting::extension(key, display_name, &stored.value);
                        setting.grbl_id = stored.grbl_id;
                        setting.fluidnc_path = stored.fluidnc_path.clone();
                        self.insert(setting)
                    }
                }
            }
        };
        self.settings[position].store(stored.value, false);
    }

    /// Write the keyed JSON format to `path`
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        let content = self.to_json()?;
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))
    }

    /// Read either JSON format from `path`
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsDocument {
    format_version: u32,
    settings: BTreeMap<String, StoredSetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSetting {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grbl_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fluidnc_path: Option<String>,
}

/// `$key=value` with comments removed
fn split_setting_line(line: &str) -> Option<(String, String)> {
    let cleaned = strip_comments(line);
    let body = cleaned.trim().strip_prefix('$')?;
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

fn normalize_path(path: &str) -> String {
    let lower = path.trim().to_ascii_lowercase();
    if lower.starts_with('/') {
        lower
    } else {
        format!("/{}", lower)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// `1` equals `true`, `3000` equals `3000.000`
fn values_equal(a: &str, b: &str) -> bool {
    if let (Some(x), Some(y)) = (parse_bool(a), parse_bool(b)) {
        return x == y;
    }
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() < 1e-9,
        _ => a.trim() == b.trim(),
    }
}

fn same_value(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => values_equal(a, b),
        (None, None) => true,
        _ => false,
    }
}

struct Def {
    id: Option<u16>,
    key: &'static str,
    name: &'static str,
    category: SettingCategory,
    units: &'static str,
    kind: SettingType,
    path: Option<&'static str>,
    min: Option<f64>,
    max: Option<f64>,
    default: &'static str,
}

impl Def {
    fn to_setting(&self) -> UnifiedSetting {
        UnifiedSetting {
            key: self.key.to_string(),
            display_name: self.name.to_string(),
            category: self.category,
            units: self.units.to_string(),
            setting_type: self.kind,
            grbl_id: self.id,
            fluidnc_path: self.path.map(str::to_string),
            min: self.min,
            max: self.max,
            default_value: self.default.to_string(),
            value: None,
            modified: false,
            changed_from_default: false,
        }
    }
}

macro_rules! def {
    ($id:expr, $key:literal, $name:literal, $cat:ident, $units:literal, $kind:ident,
     $path:expr, $min:expr, $max:expr, $default:literal) => {
        Def {
            id: $id,
            key: $key,
            name: $name,
            category: SettingCategory::$cat,
            units: $units,
            kind: SettingType::$kind,
            path: $path,
            min: $min,
            max: $max,
            default: $default,
        }
    };
}

const REGISTRY: &[Def] = &[
    def!(Some(0), "step_pulse_us", "Step pulse time", General, "us", Integer, Some("/stepping/pulse_us"), Some(1.0), Some(255.0), "10"),
    def!(Some(1), "step_idle_delay_ms", "Step idle delay", General, "ms", Integer, Some("/stepping/idle_ms"), Some(0.0), Some(255.0), "25"),
    def!(Some(2), "step_invert_mask", "Step pulse invert", General, "mask", Mask, None, Some(0.0), Some(7.0), "0"),
    def!(Some(3), "dir_invert_mask", "Step direction invert", General, "mask", Mask, None, Some(0.0), Some(7.0), "0"),
    def!(Some(4), "invert_step_enable", "Invert step enable pin", General, "", Boolean, None, None, None, "0"),
    def!(Some(5), "invert_limit_pins", "Invert limit pins", General, "", Boolean, None, None, None, "0"),
    def!(Some(6), "invert_probe_pin", "Invert probe pin", General, "", Boolean, None, None, None, "0"),
    def!(Some(10), "status_report_mask", "Status report options", Reporting, "mask", Mask, None, Some(0.0), Some(3.0), "1"),
    def!(Some(11), "junction_deviation", "Junction deviation", Motion, "mm", Float, Some("/junction_deviation_mm"), Some(0.0), None, "0.010"),
    def!(Some(12), "arc_tolerance", "Arc tolerance", Motion, "mm", Float, Some("/arc_tolerance_mm"), Some(0.0), None, "0.002"),
    def!(Some(13), "report_inches", "Report in inches", Reporting, "", Boolean, Some("/report_inches"), None, None, "0"),
    def!(Some(20), "soft_limits", "Soft limits enable", Limits, "", Boolean, None, None, None, "0"),
    def!(Some(21), "hard_limits", "Hard limits enable", Limits, "", Boolean, None, None, None, "0"),
    def!(Some(22), "homing_enable", "Homing cycle enable", Homing, "", Boolean, None, None, None, "1"),
    def!(Some(23), "homing_dir_mask", "Homing direction invert", Homing, "mask", Mask, None, Some(0.0), Some(7.0), "0"),
    def!(Some(24), "homing_feed", "Homing locate feed rate", Homing, "mm/min", Float, None, Some(0.0), None, "25.000"),
    def!(Some(25), "homing_seek", "Homing search seek rate", Homing, "mm/min", Float, None, Some(0.0), None, "500.000"),
    def!(Some(26), "homing_debounce", "Homing switch debounce", Homing, "ms", Integer, None, Some(0.0), Some(65535.0), "250"),
    def!(Some(27), "homing_pulloff", "Homing switch pull-off", Homing, "mm", Float, None, Some(0.0), None, "1.000"),
    def!(Some(30), "spindle_max_rpm", "Maximum spindle speed", Spindle, "RPM", Float, None, Some(0.0), None, "1000"),
    def!(Some(31), "spindle_min_rpm", "Minimum spindle speed", Spindle, "RPM", Float, None, Some(0.0), None, "0"),
    def!(Some(32), "laser_mode", "Laser mode enable", Laser, "", Boolean, None, None, None, "0"),
    def!(Some(100), "x_steps_per_mm", "X steps/mm", Axes, "step/mm", Float, Some("/axes/x/steps_per_mm"), Some(0.0), None, "250.000"),
    def!(Some(101), "y_steps_per_mm", "Y steps/mm", Axes, "step/mm", Float, Some("/axes/y/steps_per_mm"), Some(0.0), None, "250.000"),
    def!(Some(102), "z_steps_per_mm", "Z steps/mm", Axes, "step/mm", Float, Some("/axes/z/steps_per_mm"), Some(0.0), None, "250.000"),
    def!(Some(110), "x_max_rate", "X max rate", Axes, "mm/min", Float, Some("/axes/x/max_rate_mm_per_min"), Some(0.0), None, "3000.000"),
    def!(Some(111), "y_max_rate", "Y max rate", Axes, "mm/min", Float, Some("/axes/y/max_rate_mm_per_min"), Some(0.0), None, "3000.000"),
    def!(Some(112), "z_max_rate", "Z max rate", Axes, "mm/min", Float, Some("/axes/z/max_rate_mm_per_min"), Some(0.0), None, "1000.000"),
    def!(Some(120), "x_acceleration", "X acceleration", Axes, "mm/s^2", Float, Some("/axes/x/acceleration_mm_per_sec2"), Some(0.0), None, "200.000"),
    def!(Some(121), "y_acceleration", "Y acceleration", Axes, "mm/s^2", Float, Some("/axes/y/acceleration_mm_per_sec2"), Some(0.0), None, "200.000"),
    def!(Some(122), "z_acceleration", "Z acceleration", Axes, "mm/s^2", Float, Some("/axes/z/acceleration_mm_per_sec2"), Some(0.0), None, "100.000"),
    def!(Some(130), "x_max_travel", "X max travel", Axes, "mm", Float, Some("/axes/x/max_travel_mm"), Some(0.0), None, "300.000"),
    def!(Some(131), "y_max_travel", "Y max travel", Axes, "mm", Float, Some("/axes/y/max_travel_mm"), Some(0.0), None, "300.000"),
    def!(Some(132), "z_max_travel", "Z max travel", Axes, "mm", Float, Some("/axes/z/max_travel_mm"), Some(0.0), None, "100.000"),
    def!(None, "must_home", "Require homing at startup", Homing, "", Boolean, Some("/start/must_home"), None, None, "1"),
    def!(None, "deactivate_parking", "Deactivate parking at startup", General, "", Boolean, Some("/start/deactivate_parking"), None, None, "0"),
    def!(None, "x_homing_cycle", "X homing cycle", Homing, "", Integer, Some("/axes/x/homing/cycle"), Some(-1.0), Some(6.0), "2"),
    def!(None, "y_homing_cycle", "Y homing cycle", Homing, "", Integer, Some("/axes/y/homing/cycle"), Some(-1.0), Some(6.0), "2"),
    def!(None, "z_homing_cycle", "Z homing cycle", Homing, "", Integer, Some("/axes/z/homing/cycle"), Some(-1.0), Some(6.0), "1"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_keys_unique() {
        let map = UnifiedSettingsMap::new();
        assert_eq!(map.len(), REGISTRY.len());
        assert_eq!(map.index.len(), REGISTRY.len());
    }

    #[test]
    fn test_parse_grbl_line_updates_registry_entry() {
        let mut map = UnifiedSettingsMap::new();
        let setting = map.parse_grbl_line("$110=5000.000").unwrap();
        assert_eq!(setting.key, "x_max_rate");
        assert_eq!(setting.value.as_deref(), Some("5000.000"));
        assert!(setting.changed_from_default);
        assert!(!setting.modified);

        let setting = map.parse_grbl_line("$0=10 (step pulse, usec)").unwrap();
        assert_eq!(setting.value.as_deref(), Some("10"));
        assert!(!setting.changed_from_default);
    }

    #[test]
    fn test_unknown_id_becomes_extension() {
        let mut map = UnifiedSettingsMap::new();
        let before = map.len();
        let setting = map.parse_grbl_line("$341=2").unwrap();
        assert!(setting.is_extension());
        assert_eq!(setting.key, "grbl_341");
        assert_eq!(setting.grbl_id, Some(341));
        assert_eq!(map.len(), before + 1);

        map.parse_grbl_line("$341=3");
        assert_eq!(map.len(), before + 1);
        assert_eq!(map.get("grbl_341").unwrap().value.as_deref(), Some("3"));
    }

    #[test]
    fn test_parse_fluidnc_line() {
        let mut map = UnifiedSettingsMap::new();
        let setting = map
            .parse_fluidnc_line("$/axes/x/max_rate_mm_per_min=5000.000")
            .unwrap();
        assert_eq!(setting.key, "x_max_rate");

        let setting = map
            .parse_fluidnc_line("$/axes/x/homing/mpos_mm=-2")
            .unwrap();
        assert_eq!(setting.key, "fluidnc_axes_x_homing_mpos_mm");
        assert_eq!(setting.fluidnc_path.as_deref(), Some("/axes/x/homing/mpos_mm"));

        assert!(map.parse_fluidnc_line("ok").is_none());
        assert!(map.parse_fluidnc_line("$=1").is_none());
    }

    #[test]
    fn test_build_set_command_dialects() {
        let map = UnifiedSettingsMap::new();
        assert_eq!(
            map.build_set_command("x_max_rate", "5000", Firmware::Grbl).unwrap(),
            "$110=5000"
        );
        assert_eq!(
            map.build_set_command("x_max_rate", "5000", Firmware::FluidNc).unwrap(),
            "$/axes/x/max_rate_mm_per_min=5000"
        );
        assert_eq!(
            map.build_set_command("report_inches", "true", Firmware::GrblHal).unwrap(),
            "$13=1"
        );
        assert_eq!(
            map.build_set_command("report_inches", "1", Firmware::FluidNc).unwrap(),
            "$/report_inches=true"
        );
    }

    #[test]
    fn test_build_set_command_rejections() {
        let map = UnifiedSettingsMap::new();
        assert!(matches!(
            map.build_set_command("laser_mode", "1", Firmware::FluidNc),
            Err(FirmwareError::SettingNotAvailable { .. })
        ));
        assert!(matches!(
            map.build_set_command("must_home", "1", Firmware::Grbl),
            Err(FirmwareError::SettingNotAvailable { .. })
        ));
        assert!(matches!(
            map.build_set_command("step_pulse_us", "0", Firmware::Grbl),
            Err(FirmwareError::InvalidSettingValue { .. })
        ));
        assert!(matches!(
            map.build_set_command("step_invert_mask", "2.5", Firmware::Grbl),
            Err(FirmwareError::InvalidSettingValue { .. })
        ));
        assert!(matches!(
            map.build_set_command("x_max_rate", "fast", Firmware::Grbl),
            Err(FirmwareError::InvalidSettingValue { .. })
        ));
    }

    #[test]
    fn test_visibility_by_firmware() {
        let map = UnifiedSettingsMap::new();
        let grbl = map.get_visible(Firmware::Grbl);
        assert!(grbl.iter().all(|s| s.grbl_id.is_some()));
        assert!(grbl.iter().any(|s| s.key == "laser_mode"));
        let fluid = map.get_visible(Firmware::FluidNc);
        assert!(fluid.iter().all(|s| s.fluidnc_path.is_some()));
        assert!(fluid.iter().any(|s| s.key == "must_home"));
        assert!(!fluid.iter().any(|s| s.key == "laser_mode"));
    }

    #[test]
    fn test_set_value_and_mark_saved() {
        let mut map = UnifiedSettingsMap::new();
        map.set_value("homing_enable", "false").unwrap();
        let setting = map.get("homing_enable").unwrap();
        assert_eq!(setting.value.as_deref(), Some("0"));
        assert!(setting.modified);
        assert!(setting.changed_from_default);
        assert_eq!(map.modified().len(), 1);

        map.mark_saved();
        assert!(map.modified().is_empty());
        assert!(map.set_value("no_such_key", "1").is_err());
    }

    #[test]
    fn test_values_equal() {
        assert!(values_equal("3000", "3000.000"));
        assert!(values_equal("true", "1"));
        assert!(!values_equal("0.010", "0.02"));
        assert!(values_equal("gpio.2", "gpio.2"));
    }
}
