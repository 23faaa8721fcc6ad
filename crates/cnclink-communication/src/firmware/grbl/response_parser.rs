//! Response parsing for the GRBL family
//!
//! Classifies one received line: acknowledgements, alarms, status reports,
//! settings, welcome banners and bracketed feedback messages.

use super::error_decoder;
use crate::firmware::firmware_detector;
use cnclink_core::{Firmware, Position, WorkOffset};
use std::fmt;

/// A received line, classified
#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    /// `ok`
    Ok,
    /// `error:N`
    Error(u16),
    /// `ALARM:N`
    Alarm(u16),
    /// `<...>`; parsed by the caller, which knows the firmware and last WCO
    Status(String),
    /// `$110=500.000` or `$/axes/x/max_rate_mm_per_min=5000`
    Setting {
        /// Numeric id or FluidNC path, without the `$`
        key: String,
        /// Value as sent
        value: String,
    },
    /// Welcome banner
    Banner {
        /// Detected family
        firmware: Firmware,
        /// Version from the banner
        version: String,
        /// The banner line
        text: String,
    },
    /// `[...]` feedback
    Feedback(Feedback),
    /// Anything else
    Message(String),
}

/// Bracketed feedback message
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    /// `[VER:...]`
    Version(String),
    /// `[OPT:...]`
    Options(String),
    /// `[FIRMWARE:...]` (grblHAL)
    Firmware(String),
    /// `[G54:x,y,z]` and the other offset registers
    WorkOffset(WorkOffset),
    /// `[GC:...]` parser state
    ParserState(String),
    /// `[MSG:...]`
    Message(String),
    /// Any other bracketed line, brackets removed
    Other(String),
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "{}", error_decoder::format_error(*code)),
            Self::Alarm(code) => write!(f, "{}", error_decoder::format_alarm(*code)),
            Self::Status(line) => write!(f, "{}", line),
            Self::Setting { key, value } => write!(f, "${}={}", key, value),
            Self::Banner { text, .. } => write!(f, "{}", text),
            Self::Feedback(feedback) => write!(f, "{:?}", feedback),
            Self::Message(msg) => write!(f, "{}", msg),
        }
    }
}

const OFFSET_REGISTERS: [&str; 9] = [
    "G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92",
];

/// Classify one received line
///
/// Returns `None` for blank lines.
pub fn parse_response(line: &str) -> Option<GrblResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.eq_ignore_ascii_case("ok") {
        return Some(GrblResponse::Ok);
    }

    if let Some(code) = strip_prefix_ignore_case(line, "error:") {
        return Some(match code.trim().parse::<u16>() {
            Ok(code) => GrblResponse::Error(code),
            Err(_) => GrblResponse::Message(line.to_string()),
        });
    }

    if let Some(code) = strip_prefix_ignore_case(line, "alarm:") {
        return Some(match code.trim().parse::<u16>() {
            Ok(code) => GrblResponse::Alarm(code),
            Err(_) => GrblResponse::Message(line.to_string()),
        });
    }

    if line.starts_with('<') && line.ends_with('>') {
        return Some(GrblResponse::Status(line.to_string()));
    }

    if let Some(setting) = line.strip_prefix('$') {
        if let Some((key, value)) = setting.split_once('=') {
            return Some(GrblResponse::Setting {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
    }

    if let Some(info) = firmware_detector::info_from_banner(line) {
        return Some(GrblResponse::Banner {
            firmware: info.firmware,
            version: info.version,
            text: info.banner,
        });
    }

    if let Some(body) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
        return Some(GrblResponse::Feedback(parse_feedback(body)));
    }

    Some(GrblResponse::Message(line.to_string()))
}

fn parse_feedback(body: &str) -> Feedback {
    let Some((tag, value)) = body.split_once(':') else {
        return Feedback::Other(body.to_string());
    };

    match tag {
        "VER" => Feedback::Version(value.to_string()),
        "OPT" => Feedback::Options(value.to_string()),
        "FIRMWARE" => Feedback::Firmware(value.to_string()),
        "GC" => Feedback::ParserState(value.to_string()),
        "MSG" => Feedback::Message(value.to_string()),
        register if OFFSET_REGISTERS.contains(&register) => parse_offset(register, value)
            .map(Feedback::WorkOffset)
            .unwrap_or_else(|| Feedback::Other(body.to_string())),
        _ => Feedback::Other(body.to_string()),
    }
}

fn parse_offset(name: &str, value: &str) -> Option<WorkOffset> {
    let mut coords = value.split(',').map(|v| v.trim().parse::<f64>().ok());
    let x = coords.next()??;
    let y = coords.next()??;
    let z = coords.next()??;
    Some(WorkOffset {
        name: name.to_string(),
        offset: Position::new(x, y, z),
    })
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

/// Whether `line` answers a status query
pub fn is_status_report(line: &str) -> bool {
    matches!(parse_response(line), Some(GrblResponse::Status(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgements() {
        assert_eq!(parse_response("ok"), Some(GrblResponse::Ok));
        assert_eq!(parse_response(" OK \r"), Some(GrblResponse::Ok));
        assert_eq!(parse_response("error:22"), Some(GrblResponse::Error(22)));
        assert_eq!(parse_response("ALARM:3"), Some(GrblResponse::Alarm(3)));
        assert_eq!(parse_response("alarm:1"), Some(GrblResponse::Alarm(1)));
        assert_eq!(parse_response(""), None);
    }

    #[test]
    fn test_bad_codes_are_messages() {
        assert_eq!(
            parse_response("error:abc"),
            Some(GrblResponse::Message("error:abc".to_string()))
        );
    }

    #[test]
    fn test_settings() {
        assert_eq!(
            parse_response("$110=500.000"),
            Some(GrblResponse::Setting {
                key: "110".to_string(),
                value: "500.000".to_string()
            })
        );
        assert_eq!(
            parse_response("$/axes/x/steps_per_mm=80"),
            Some(GrblResponse::Setting {
                key: "/axes/x/steps_per_mm".to_string(),
                value: "80".to_string()
            })
        );
    }

    #[test]
    fn test_work_offset() {
        let parsed = parse_response("[G54:10.000,-5.500,0.000]");
        assert_eq!(
            parsed,
            Some(GrblResponse::Feedback(Feedback::WorkOffset(WorkOffset {
                name: "G54".to_string(),
                offset: Position::new(10.0, -5.5, 0.0),
            })))
        );
        assert!(matches!(
            parse_response("[PRB:0.000,0.000,0.000:0]"),
            Some(GrblResponse::Feedback(Feedback::Other(_)))
        ));
    }

    #[test]
    fn test_banner() {
        assert!(matches!(
            parse_response("Grbl 1.1h ['$' for help]"),
            Some(GrblResponse::Banner {
                firmware: Firmware::Grbl,
                ..
            })
        ));
    }

    #[test]
    fn test_feedback() {
        assert_eq!(
            parse_response("[MSG:Caution: Unlocked]"),
            Some(GrblResponse::Feedback(Feedback::Message(
                "Caution: Unlocked".to_string()
            )))
        );
        assert_eq!(
            parse_response("[OPT:V,15,128]"),
            Some(GrblResponse::Feedback(Feedback::Options("V,15,128".to_string())))
        );
        assert!(is_status_report("<Idle|MPos:0,0,0>"));
    }
}
