//! Reply parsing.
//!
//! [`parse_reply`] is the single entry point. It looks up the command's [`ReplyShape`]
//! and applies the matching extraction rule:
//!
//! | Shape | Rule | Empty reply |
//! |-------|------|-------------|
//! | `Scalar` | `LABEL [=] <signed decimal>` | `ParseFailure` |
//! | `Vector` | strip unit suffix, keep `[0-9.,-]`, split on `,` | `ParseFailure` |
//! | `Text` | trimmed text verbatim | empty `Text` |
//! | `Banner` | `<product> <version token>`, else raw text | empty `Text` |
//!
//! A vector reply either parses completely or fails completely; partial lists are never
//! returned.

use crate::error::ParseFailure;
use crate::instrument::command::{Command, ReplyShape};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// Compiled patterns for every command whose shape needs one.
static PATTERNS: LazyLock<HashMap<Command, Regex>> = LazyLock::new(|| {
    Command::ALL
        .into_iter()
        .filter_map(|command| {
            let pattern = match command.shape() {
                ReplyShape::Scalar { label } => {
                    format!(r"\b{}\s*=?\s*([-+]?[\d.]+)", regex::escape(label))
                }
                ReplyShape::Banner { product } => {
                    format!(r"{}\s*([\d.a-zA-Z]+)", regex::escape(product))
                }
                ReplyShape::Vector { .. } | ReplyShape::Text => return None,
            };
            Some((
                command,
                Regex::new(&pattern).expect("Invalid reply pattern in command table"),
            ))
        })
        .collect()
});

/// Trimmed text payload returned by the transport for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReply(String);

impl RawReply {
    /// Decode bytes as text, replacing invalid sequences, and trim surrounding whitespace.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(String::from_utf8_lossy(bytes).trim().to_string())
    }

    /// Reply text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the device sent nothing (silence or timeout).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RawReply {
    fn from(text: &str) -> Self {
        Self(text.trim().to_string())
    }
}

impl fmt::Display for RawReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed value of one reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reading {
    /// Single value, unit implied by the command.
    Scalar(f64),
    /// Ordered dBm samples of a band sweep. Never empty.
    Vector(Vec<f64>),
    /// Mode name or firmware version.
    Text(String),
}

impl Reading {
    /// Scalar value, if this is a scalar reading.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Reading::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    /// Samples, if this is a vector reading.
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Reading::Vector(samples) => Some(samples),
            _ => None,
        }
    }

    /// Text, if this is a text reading.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reading::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Convert a raw reply into a reading according to the command that produced it.
pub fn parse_reply(command: Command, reply: &RawReply) -> Result<Reading, ParseFailure> {
    let raw = reply.as_str();
    match command.shape() {
        ReplyShape::Scalar { label } => parse_scalar(command, label, raw),
        ReplyShape::Vector { unit_suffix } => parse_vector(command, unit_suffix, raw),
        ReplyShape::Text => Ok(Reading::Text(raw.to_string())),
        ReplyShape::Banner { product } => Ok(parse_banner(command, product, raw)),
    }
}

fn parse_scalar(command: Command, label: &str, raw: &str) -> Result<Reading, ParseFailure> {
    if raw.is_empty() {
        return Err(ParseFailure::new(command, raw, "empty reply"));
    }

    let captures = PATTERNS
        .get(&command)
        .and_then(|pattern| pattern.captures(raw))
        .ok_or_else(|| ParseFailure::new(command, raw, format!("no {label} value found")))?;

    let numeral = captures.get(1).map_or("", |m| m.as_str());
    numeral
        .parse::<f64>()
        .map(Reading::Scalar)
        .map_err(|e| ParseFailure::new(command, raw, format!("invalid numeral '{numeral}': {e}")))
}

fn parse_vector(command: Command, unit_suffix: &str, raw: &str) -> Result<Reading, ParseFailure> {
    if raw.is_empty() {
        return Err(ParseFailure::new(command, raw, "empty reply"));
    }

    let cleaned: String = raw
        .replace(unit_suffix, "")
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();

    let samples = cleaned
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment.parse::<f64>().map_err(|e| {
                ParseFailure::new(command, raw, format!("invalid sample '{segment}': {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if samples.is_empty() {
        return Err(ParseFailure::new(command, raw, "no numeric samples"));
    }
    Ok(Reading::Vector(samples))
}

/// Banner formats differ between firmware revisions, so a mismatch is not an error.
fn parse_banner(command: Command, product: &str, raw: &str) -> Reading {
    if let Some(token) = PATTERNS
        .get(&command)
        .and_then(|pattern| pattern.captures(raw))
        .and_then(|captures| captures.get(1))
    {
        return Reading::Text(token.as_str().to_string());
    }

    if !raw.is_empty() {
        warn!(
            command = %command,
            raw = %raw,
            "Unexpected {} banner, using raw reply",
            product
        );
    }
    Reading::Text(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(command: Command, raw: &str) -> Result<Reading, ParseFailure> {
        parse_reply(command, &RawReply::from(raw))
    }

    #[test]
    fn test_every_command_pattern_compiles() {
        for command in Command::ALL {
            let needs_pattern = matches!(
                command.shape(),
                ReplyShape::Scalar { .. } | ReplyShape::Banner { .. }
            );
            assert_eq!(PATTERNS.contains_key(&command), needs_pattern, "{command}");
        }
    }

    #[test]
    fn test_parse_scalar_replies() {
        assert_eq!(parse(Command::Emf, "EMF = 1.23").unwrap(), Reading::Scalar(1.23));
        assert_eq!(parse(Command::Emf, "EMF=0.4 mG").unwrap(), Reading::Scalar(0.4));
        assert_eq!(parse(Command::Ef, "EF = 12.5V/m").unwrap(), Reading::Scalar(12.5));
        assert_eq!(parse(Command::Ef, "EF 7").unwrap(), Reading::Scalar(7.0));
        assert_eq!(parse(Command::Emf, "  EMF = -0.5  ").unwrap(), Reading::Scalar(-0.5));
    }

    #[test]
    fn test_scalar_label_is_word_bounded() {
        // "REF" must not satisfy the EF pattern
        assert!(parse(Command::Ef, "REF = 3.0").is_err());
        assert!(parse(Command::Ef, "EMF = 3.0").is_err());
    }

    #[test]
    fn test_parse_scalar_failures() {
        let empty = parse(Command::Emf, "").unwrap_err();
        assert_eq!(empty.command, Command::Emf);
        assert_eq!(empty.reason, "empty reply");

        let missing = parse(Command::Emf, "ERR").unwrap_err();
        assert_eq!(missing.raw, "ERR");
        assert!(missing.reason.contains("no EMF value"));

        // Numeral captured but not convertible
        let bad = parse(Command::Emf, "EMF = 1.2.3").unwrap_err();
        assert!(bad.reason.contains("invalid numeral '1.2.3'"));
        assert!(parse(Command::Emf, "EMF = .").is_err());
        assert!(parse(Command::Emf, "EMF = -").is_err());
    }

    #[test]
    fn test_parse_band_sweep() {
        assert_eq!(
            parse(Command::RfBand, "-40.0,-45.5,-38.2 dBm").unwrap(),
            Reading::Vector(vec![-40.0, -45.5, -38.2])
        );
        // Suffix on every sample, stray text and empty segments
        assert_eq!(
            parse(Command::RfBand, "-40 dBm, -41 dBm,, -42 dBm").unwrap(),
            Reading::Vector(vec![-40.0, -41.0, -42.0])
        );
        assert_eq!(
            parse(Command::RfBand, "data: -60.5,-61").unwrap(),
            Reading::Vector(vec![-60.5, -61.0])
        );
    }

    #[test]
    fn test_band_sweep_is_all_or_nothing() {
        assert!(parse(Command::RfBand, "").is_err());
        assert!(parse(Command::RfBand, "dBm").is_err());
        assert!(parse(Command::RfBand, "\u{1}\u{2}xyz").is_err());

        // One corrupted segment fails the whole sweep
        let err = parse(Command::RfBand, "-40.0,-4-5,-38.2").unwrap_err();
        assert!(err.reason.contains("-4-5"));
    }

    #[test]
    fn test_text_replies_are_verbatim() {
        assert_eq!(
            parse(Command::Mode, "RF Peak").unwrap(),
            Reading::Text("RF Peak".into())
        );
        // Empty mode is information, not a failure
        assert_eq!(parse(Command::Mode, "").unwrap(), Reading::Text(String::new()));
    }

    #[test]
    fn test_version_banner_with_fallback() {
        assert_eq!(
            parse(Command::Version, "GQ-EMF390v2Re 1.06").unwrap(),
            Reading::Text("1.06".into())
        );
        assert_eq!(
            parse(Command::Version, "GQ-EMF390v2Re3.70").unwrap(),
            Reading::Text("3.70".into())
        );
        assert_eq!(
            parse(Command::Version, "GQ-EMF390 Re 2.1").unwrap(),
            Reading::Text("GQ-EMF390 Re 2.1".into())
        );
        assert_eq!(parse(Command::Version, "").unwrap(), Reading::Text(String::new()));
    }

    #[test]
    fn test_raw_reply_decoding() {
        let reply = RawReply::from_bytes(b"  EMF = 1.0\r\n");
        assert_eq!(reply.as_str(), "EMF = 1.0");

        let lossy = RawReply::from_bytes(&[b'E', b'F', 0xff, b'=', b'2']);
        assert_eq!(lossy.as_str(), "EF\u{fffd}=2");
        assert!(RawReply::from_bytes(b" \r\n").is_empty());
    }

    #[test]
    fn test_reading_accessors() {
        assert_eq!(Reading::Scalar(1.0).as_scalar(), Some(1.0));
        assert_eq!(Reading::Scalar(1.0).as_text(), None);
        assert_eq!(Reading::Vector(vec![1.0]).as_vector(), Some(&[1.0][..]));
        assert_eq!(Reading::Text("x".into()).as_text(), Some("x"));
    }
}
