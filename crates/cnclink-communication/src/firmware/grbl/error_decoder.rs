//! Error and alarm code decoding for the GRBL family
//!
//! Codes 1-38 and alarms 1-9 are shared by GRBL, grblHAL and FluidNC; the
//! higher codes are grblHAL extensions that FluidNC partly reuses.

/// Describe an `error:N` code
pub fn describe_error(code: u16) -> &'static str {
    match code {
        1 => "Expected command letter",
        2 => "Bad number format",
        3 => "Invalid '$' statement",
        4 => "Negative value",
        5 => "Homing not enabled",
        6 => "Step pulse too short",
        7 => "EEPROM read failed; settings restored to defaults",
        8 => "'$' command only valid when idle",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits require homing",
        11 => "Line too long",
        12 => "Setting exceeds maximum step rate",
        13 => "Safety door open",
        14 => "Startup line too long",
        15 => "Jog target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported or invalid g-code command",
        21 => "Modal group violation",
        22 => "Undefined feed rate",
        23 => "Command requires an integer value",
        24 => "Two commands both need axis words",
        25 => "Repeated g-code word",
        26 => "No axis words in command that needs them",
        27 => "Line number out of range",
        28 => "Missing P or L value",
        29 => "Unsupported work coordinate system",
        30 => "G53 requires G0 or G1",
        31 => "Unused axis words with G80 active",
        32 => "Arc has no axis words in plane",
        33 => "Invalid motion target",
        34 => "Arc radius error",
        35 => "Arc missing IJK offset",
        36 => "Unused g-code words",
        37 => "Tool length offset axis mismatch",
        38 => "Tool number out of range",
        39 => "No canned cycle active",
        40 => "Value word missing",
        41 => "Value word conflict",
        43 => "Spindle requires RPM",
        45 => "Max step rate exceeded",
        47 => "Illegal operation inside program",
        49 => "Value out of range",
        53 => "Invalid file number",
        56 => "File not found",
        60 => "Invalid parameter value",
        63 => "Max travel exceeded",
        64 => "Max feed rate exceeded",
        65 => "Feature disabled",
        69 => "Homing required",
        71 => "Tool change required",
        72 => "Not allowed in current state",
        74 => "Controller busy",
        _ => "Unknown error",
    }
}

/// Describe an `ALARM:N` code
pub fn describe_alarm(code: u16) -> &'static str {
    match code {
        1 => "Hard limit triggered; position lost, re-home",
        2 => "Soft limit: target exceeds machine travel",
        3 => "Reset while in motion; position lost, re-home",
        4 => "Probe fail: probe not in expected initial state",
        5 => "Probe fail: no contact within travel",
        6 => "Homing fail: reset during homing",
        7 => "Homing fail: door opened during homing",
        8 => "Homing fail: could not clear limit switch",
        9 => "Homing fail: limit switch not found",
        10 => "Limit switch engaged at homing start",
        11 => "Homing required",
        12 => "E-stop asserted",
        13 => "Motor fault",
        14 => "Homing configuration error",
        15 => "Self-test failed",
        16 => "Spindle did not reach speed",
        17 => "Probe protection triggered",
        _ => "Unknown alarm",
    }
}

/// `error:N (description)`
pub fn format_error(code: u16) -> String {
    format!("error:{} ({})", code, describe_error(code))
}

/// `ALARM:N (description)`
pub fn format_alarm(code: u16) -> String {
    format!("ALARM:{} ({})", code, describe_alarm(code))
}
