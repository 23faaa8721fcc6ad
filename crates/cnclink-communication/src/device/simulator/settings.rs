//! Settings table of the simulated firmware.

use cnclink_core::Firmware;

/// One simulated setting
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SimSetting {
    pub id: Option<u16>,
    pub path: Option<&'static str>,
    pub value: String,
    integer: bool,
}

impl SimSetting {
    fn numeric(id: u16, path: Option<&'static str>, default: &str) -> Self {
        Self {
            id: Some(id),
            path,
            value: default.to_string(),
            integer: !default.contains('.'),
        }
    }

    fn path_only(path: &'static str, default: &str) -> Self {
        Self {
            id: None,
            path: Some(path),
            value: default.to_string(),
            integer: false,
        }
    }

    /// Parse and store a new value, formatted the way the firmware echoes it
    fn assign(&mut self, raw: &str) -> Result<(), u16> {
        let raw = raw.trim();
        if self.id.is_none() {
            if raw.is_empty() {
                return Err(2);
            }
            self.value = raw.to_string();
            return Ok(());
        }
        let number: f64 = raw.parse().map_err(|_| 2u16)?;
        if !number.is_finite() {
            return Err(2);
        }
        if number < 0.0 {
            return Err(4);
        }
        self.value = if self.integer {
            format!("{}", number.trunc() as i64)
        } else {
            format!("{:.3}", number)
        };
        Ok(())
    }

    pub fn as_f64(&self) -> f64 {
        self.value.parse().unwrap_or(0.0)
    }
}

/// Setting values held by the simulator
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SimSettings {
    entries: Vec<SimSetting>,
}

impl Default for SimSettings {
    fn default() -> Self {
        use SimSetting as S;
        let entries = vec![
            S::numeric(0, Some("/stepping/pulse_us"), "10"),
            S::numeric(1, Some("/stepping/idle_ms"), "25"),
            S::numeric(2, None, "0"),
            S::numeric(3, None, "0"),
            S::numeric(4, None, "0"),
            S::numeric(5, None, "0"),
            S::numeric(6, None, "0"),
            S::numeric(10, None, "1"),
            S::numeric(11, Some("/junction_deviation_mm"), "0.010"),
            S::numeric(12, Some("/arc_tolerance_mm"), "0.002"),
            S::numeric(13, Some("/report_inches"), "0"),
            S::numeric(20, None, "0"),
            S::numeric(21, None, "0"),
            S::numeric(22, None, "1"),
            S::numeric(23, None, "0"),
            S::numeric(24, None, "25.000"),
            S::numeric(25, None, "500.000"),
            S::numeric(26, None, "250"),
            S::numeric(27, None, "1.000"),
            S::numeric(30, None, "1000"),
            S::numeric(31, None, "0"),
            S::numeric(32, None, "0"),
            S::numeric(100, Some("/axes/x/steps_per_mm"), "250.000"),
            S::numeric(101, Some("/axes/y/steps_per_mm"), "250.000"),
            S::numeric(102, Some("/axes/z/steps_per_mm"), "250.000"),
            S::numeric(110, Some("/axes/x/max_rate_mm_per_min"), "3000.000"),
            S::numeric(111, Some("/axes/y/max_rate_mm_per_min"), "3000.000"),
            S::numeric(112, Some("/axes/z/max_rate_mm_per_min"), "1000.000"),
            S::numeric(120, Some("/axes/x/acceleration_mm_per_sec2"), "200.000"),
            S::numeric(121, Some("/axes/y/acceleration_mm_per_sec2"), "200.000"),
            S::numeric(122, Some("/axes/z/acceleration_mm_per_sec2"), "100.000"),
            S::numeric(130, Some("/axes/x/max_travel_mm"), "300.000"),
            S::numeric(131, Some("/axes/y/max_travel_mm"), "300.000"),
            S::numeric(132, Some("/axes/z/max_travel_mm"), "100.000"),
            S::path_only("/start/must_home", "true"),
        ];
        Self { entries }
    }
}

impl SimSettings {
    /// `$$` output for the firmware dialect
    pub fn dump(&self, firmware: Firmware) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|s| match firmware {
                Firmware::Grbl | Firmware::GrblHal => s.id.map(|id| format!("${}={}", id, s.value)),
                Firmware::FluidNc => s.path.map(|path| format!("${}={}", path, s.value)),
            })
            .collect()
    }

    pub fn by_id(&self, id: u16) -> Option<&SimSetting> {
        self.entries.iter().find(|s| s.id == Some(id))
    }

    pub fn by_path(&self, path: &str) -> Option<&SimSetting> {
        self.entries.iter().find(|s| s.path == Some(path))
    }

    pub fn value_f64(&self, id: u16) -> f64 {
        self.by_id(id).map(SimSetting::as_f64).unwrap_or(0.0)
    }

    /// `$N=V`; unknown ids are error 3
    pub fn set_by_id(&mut self, id: u16, raw: &str) -> Result<(), u16> {
        self.entries
            .iter_mut()
            .find(|s| s.id == Some(id))
            .ok_or(3u16)?
            .assign(raw)
    }

    /// `$/path=V`; unknown paths are error 3
    pub fn set_by_path(&mut self, path: &str, raw: &str) -> Result<(), u16> {
        self.entries
            .iter_mut()
            .find(|s| s.path == Some(path))
            .ok_or(3u16)?
            .assign(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_dialects() {
        let settings = SimSettings::default();
        let grbl = settings.dump(Firmware::Grbl);
        assert!(grbl.contains(&"$110=3000.000".to_string()));
        assert!(grbl.iter().all(|l| !l.starts_with("$/")));
        let fluid = settings.dump(Firmware::FluidNc);
        assert!(fluid.contains(&"$/axes/x/max_rate_mm_per_min=3000.000".to_string()));
        assert!(fluid.contains(&"$/start/must_home=true".to_string()));
    }

    #[test]
    fn test_assign_formats() {
        let mut settings = SimSettings::default();
        settings.set_by_id(110, "5000").unwrap();
        assert_eq!(settings.by_id(110).unwrap().value, "5000.000");
        settings.set_by_id(0, "12.7").unwrap();
        assert_eq!(settings.by_id(0).unwrap().value, "12");
        assert_eq!(settings.set_by_id(999, "1"), Err(3));
        assert_eq!(settings.set_by_id(110, "fast"), Err(2));
        assert_eq!(settings.set_by_path("/axes/x/steps_per_mm", "80"), Ok(()));
        assert_eq!(settings.by_id(100).unwrap().value, "80.000");
    }
}
