//! Command-line utilities for the GRBL family
//!
//! Word scanning of outgoing lines (tool changes, motion detection) and
//! formatting of the commands the controller builds itself.

use cnclink_core::Position;
use regex::Regex;
use std::sync::OnceLock;

/// One `letter + number` word of a G-code line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word {
    /// Upper-case letter
    pub letter: char,
    /// Numeric value
    pub value: f64,
}

/// Remove `(...)` and `;...` comments
///
/// An unterminated `(` comments out the rest of the line.
pub fn strip_comments(line: &str) -> String {
    static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = COMMENT_REGEX
        .get_or_init(|| Regex::new(r"\([^)]*\)?|;.*").expect("invalid regex pattern"));
    regex.replace_all(line, "").to_string()
}

/// Split a line into words, skipping anything that does not parse
pub fn words(line: &str) -> Vec<Word> {
    let cleaned = strip_comments(line);
    let mut result = Vec::new();
    let mut chars = cleaned.chars().filter(|c| !c.is_whitespace()).peekable();
    while let Some(c) = chars.next() {
        if !c.is_ascii_alphabetic() {
            continue;
        }
        let mut number = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || next == '.' || next == '-' || next == '+' {
                number.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if let Ok(value) = number.parse::<f64>() {
            result.push(Word {
                letter: c.to_ascii_uppercase(),
                value,
            });
        }
    }
    result
}

fn is_code(word: &Word, letter: char, code: f64) -> bool {
    word.letter == letter && (word.value - code).abs() < 1e-6
}

/// Whether the line requests a tool change (`M6`, `M06`; not `M60`)
pub fn is_tool_change(line: &str) -> bool {
    words(line).iter().any(|w| is_code(w, 'M', 6.0))
}

/// Tool number from a `T` word on the line
pub fn tool_number(line: &str) -> Option<u32> {
    words(line)
        .iter()
        .rev()
        .find(|w| w.letter == 'T' && w.value >= 0.0)
        .map(|w| w.value as u32)
}

/// Whether a manual command would move the machine
///
/// `$H` and `$J=` count as motion; other `$` commands and pure modal lines do
/// not.
pub fn is_motion_command(line: &str) -> bool {
    let trimmed = line.trim();
    if let Some(system) = trimmed.strip_prefix('$') {
        let upper = system.to_ascii_uppercase();
        return upper.starts_with('H') || upper.starts_with("J=");
    }
    let words = words(trimmed);
    let motion_code = words.iter().any(|w| {
        w.letter == 'G'
            && [0.0, 1.0, 2.0, 3.0, 28.0, 30.0, 38.2, 38.3, 38.4, 38.5]
                .iter()
                .any(|code| is_code(w, 'G', *code))
    });
    let axis_word = words.iter().any(|w| matches!(w.letter, 'X' | 'Y' | 'Z'));
    let sets_offset = words
        .iter()
        .any(|w| is_code(w, 'G', 10.0) || is_code(w, 'G', 92.0));
    motion_code || (axis_word && !sets_offset)
}

/// Build a relative, metric jog command
///
/// Returns `None` when every axis delta is zero.
pub fn format_jog(delta: &Position, feed_rate: f64) -> Option<String> {
    let axes: Vec<String> = [('X', delta.x), ('Y', delta.y), ('Z', delta.z)]
        .iter()
        .filter(|(_, d)| d.abs() > f64::EPSILON)
        .map(|(axis, d)| format!("{}{}", axis, format_position(*d)))
        .collect();
    if axes.is_empty() {
        return None;
    }
    Some(format!(
        "$J=G91 G21 {} F{}",
        axes.join(" "),
        format_number(feed_rate)
    ))
}

/// Format a coordinate with three decimals
pub fn format_position(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    // adding zero folds -0.0 into 0.0
    format!("{:.3}", rounded + 0.0)
}

/// Shortest decimal form, at most three places
///
/// Used for feeds and speeds: `1000`, `12.5`, `0.25`.
pub fn format_number(value: f64) -> String {
    let text = format_position(value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Format a position as `x,y,z`
pub fn format_positions(position: &Position) -> String {
    format!(
        "{},{},{}",
        format_position(position.x),
        format_position(position.y),
        format_position(position.z)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_change_detection() {
        assert!(is_tool_change("M6 T2"));
        assert!(is_tool_change("T3 M06"));
        assert!(is_tool_change("m6"));
        assert!(!is_tool_change("M60"));
        assert!(!is_tool_change("G1 X6 (M6 in comment)"));
        assert!(!is_tool_change("; M6"));
    }

    #[test]
    fn test_tool_number() {
        assert_eq!(tool_number("M6 T2"), Some(2));
        assert_eq!(tool_number("M6"), None);
    }

    #[test]
    fn test_motion_detection() {
        assert!(is_motion_command("G0 X10"));
        assert!(is_motion_command("X5 Y5"));
        assert!(is_motion_command("$H"));
        assert!(is_motion_command("$J=G91 X1 F100"));
        assert!(!is_motion_command("$X"));
        assert!(!is_motion_command("$$"));
        assert!(!is_motion_command("G21 G90"));
        assert!(!is_motion_command("G10 L20 P1 X0 Y0"));
        assert!(!is_motion_command("M5"));
    }

    #[test]
    fn test_format_jog() {
        assert_eq!(
            format_jog(&Position::new(10.0, 0.0, -1.5), 500.0),
            Some("$J=G91 G21 X10.000 Z-1.500 F500".to_string())
        );
        assert_eq!(format_jog(&Position::default(), 500.0), None);
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("G1 X1 (feed) Y2 ; done"), "G1 X1  Y2 ");
        assert_eq!(strip_comments("(a)(b)G0 Z5"), "G0 Z5");
        assert_eq!(strip_comments("G0 X1 (never closed"), "G0 X1 ");
        assert_eq!(strip_comments("; whole line"), "");
        assert_eq!(strip_comments("$110=3000.000"), "$110=3000.000");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000.0), "1000");
        assert_eq!(format_number(12.5), "12.5");
        assert_eq!(format_number(0.125), "0.125");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(100.0), "100");
        assert_eq!(
            format_jog(&Position::new(0.0, 1.0, 0.0), 37.5),
            Some("$J=G91 G21 Y1.000 F37.5".to_string())
        );
    }

    #[test]
    fn test_words() {
        let parsed = words("G1 X-1.5 (note) F200 ; trailing");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], Word { letter: 'X', value: -1.5 });
        assert_eq!(parsed[2].value, 200.0);
    }
}
