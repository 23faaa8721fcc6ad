use cnclink_core::Firmware;
use cnclink_settings::{Config, SettingCategory, UnifiedSettingsMap};
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn test_config_toml_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.connection.port = "/dev/ttyACM0".to_string();
    config.connection.status_poll_ms = 100;
    config.simulator.firmware = Firmware::GrblHal;
    config.simulator.start_in_alarm = true;
    config.macros.store_path = Some(dir.path().join("macros.json"));
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.controller_config().status_poll_ms, 100);
}

#[test]
fn test_config_json_and_missing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    let mut config = Config::default();
    config.connection.baud_rate = 250_000;
    config.save_to_file(&path).unwrap();
    assert_eq!(Config::load_from_file(&path).unwrap().connection.baud_rate, 250_000);

    let missing = dir.path().join("absent.toml");
    assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[connection]\nbaud_rate = 0\n").unwrap();
    assert!(Config::load_from_file(&path).is_err());
}

#[test]
fn test_grbl_dump_then_diff() {
    let mut device = UnifiedSettingsMap::new();
    for line in ["$0=10", "$110=3000.000", "$111=2500.000", "$32=1", "$341=4"] {
        device.parse_grbl_line(line).unwrap();
    }

    let mut backup = device.clone();
    backup.parse_grbl_line("$111=3000.000").unwrap();
    backup.parse_grbl_line("$32=0").unwrap();

    let diff = device.diff(&backup);
    let keys: Vec<&str> = diff.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["laser_mode", "y_max_rate"]);
    assert_eq!(diff[1].current.as_deref(), Some("2500.000"));
    assert_eq!(diff[1].other.as_deref(), Some("3000.000"));

    assert!(device.diff(&device.clone()).is_empty());
}

#[test]
fn test_categories_cover_registry() {
    let map = UnifiedSettingsMap::new();
    let axes = map.get_by_category(SettingCategory::Axes);
    assert_eq!(axes.len(), 12);
    assert!(map.get_by_category(SettingCategory::Extension).is_empty());
}

#[test]
fn test_legacy_numeric_import() {
    let map = UnifiedSettingsMap::from_json(r#"{"0": "10", "110": 4000, "400": "7"}"#).unwrap();
    assert_eq!(map.get("x_max_rate").unwrap().value.as_deref(), Some("4000"));
    assert_eq!(map.get("step_pulse_us").unwrap().value.as_deref(), Some("10"));
    let extension = map.get_by_grbl_id(400).unwrap();
    assert!(extension.is_extension());
    assert_eq!(extension.value.as_deref(), Some("7"));

    assert!(UnifiedSettingsMap::from_json(r#"{"speed": "fast"}"#).is_err());
    assert!(UnifiedSettingsMap::from_json("[1, 2]").is_err());
}

#[test]
fn test_settings_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup.json");

    let mut map = UnifiedSettingsMap::new();
    map.parse_fluidnc_line("$/axes/z/max_travel_mm=80.000").unwrap();
    map.parse_fluidnc_line("$/spindle/pwm/output_pin=gpio.2").unwrap();
    map.save_to_file(&path).unwrap();

    let loaded = UnifiedSettingsMap::load_from_file(&path).unwrap();
    assert_eq!(loaded.get("z_max_travel").unwrap().value.as_deref(), Some("80.000"));
    let pin = loaded.get_by_path("/spindle/pwm/output_pin").unwrap();
    assert_eq!(pin.value.as_deref(), Some("gpio.2"));
    assert!(loaded.diff(&map).is_empty());
}

fn wire_line() -> impl Strategy<Value = String> {
    prop_oneof![
        (prop::sample::select(vec![0u16, 1, 11, 22, 100, 110, 122, 132, 341, 500]), 0u32..100_000)
            .prop_map(|(id, v)| format!("${}={}", id, v)),
        (
            prop::sample::select(vec![
                "/axes/x/steps_per_mm",
                "/start/must_home",
                "/axes/y/homing/cycle",
                "/probe/pin",
                "/uart1/baud",
            ]),
            "[a-z0-9.]{1,8}"
        )
            .prop_map(|(path, v)| format!("${}={}", path, v)),
    ]
}

proptest! {
    #[test]
    fn json_round_trip_keeps_values_and_identity(lines in prop::collection::vec(wire_line(), 0..30)) {
        let mut map = UnifiedSettingsMap::new();
        for line in &lines {
            prop_assert!(map.parse_fluidnc_line(line).is_some());
        }
        let json = map.to_json().unwrap();
        let restored = UnifiedSettingsMap::from_json(&json).unwrap();

        for setting in map.iter().filter(|s| s.value.is_some()) {
            let other = restored.get(&setting.key);
            prop_assert!(other.is_some(), "missing {}", setting.key);
            let other = other.unwrap();
            prop_assert_eq!(&other.value, &setting.value);
            prop_assert_eq!(other.grbl_id, setting.grbl_id);
            prop_assert_eq!(&other.fluidnc_path, &setting.fluidnc_path);
        }
    }

    #[test]
    fn parsing_never_panics(line in "\\PC*") {
        let mut map = UnifiedSettingsMap::new();
        let _ = map.parse_grbl_line(&line);
        let _ = map.parse_fluidnc_line(&line);
    }
}
