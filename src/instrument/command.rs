//! GQ EMF-390 command table.
//!
//! Protocol Overview:
//! - Format: ASCII commands framed as `<NAME>>` (no checksum, no length prefix)
//! - Terminator: none; replies are drained after a settle delay
//! - Replies: `LABEL = value`, comma-separated dBm lists, free text, product banner
//!
//! Every command has exactly one [`ReplyShape`]. The parser dispatches on that shape and
//! never infers it from the reply content.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected structure of a command's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// `LABEL = <number>`, one floating-point value.
    Scalar {
        /// Label that precedes the numeral in the reply.
        label: &'static str,
    },
    /// Comma-separated numerals, optionally followed by a unit suffix.
    Vector {
        /// Unit suffix stripped before the numerals are split.
        unit_suffix: &'static str,
    },
    /// Free-form text returned verbatim.
    Text,
    /// Product banner followed by a version token. Falls back to the raw text.
    Banner {
        /// Product prefix anchoring the version token.
        product: &'static str,
    },
}

/// One row of the command table.
#[derive(Debug)]
pub struct CommandSpec {
    /// Stable identifier used in configuration and logs.
    pub id: &'static str,
    /// Exact bytes written to the instrument.
    pub wire: &'static [u8],
    /// Reply shape for this command.
    pub shape: ReplyShape,
    /// Field name used for published data points.
    pub field: &'static str,
    /// Unit label implied by the command, if any.
    pub unit: Option<&'static str>,
    /// Human readable name.
    pub display: &'static str,
}

/// Commands understood by the instrument.
///
/// Order of variants is the order of [`Command::ALL`] and of the table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Magnetic field (EMF), milligauss.
    Emf,
    /// Electric field, volts per meter.
    Ef,
    /// RF band sweep, dBm samples.
    RfBand,
    /// Current measurement mode.
    Mode,
    /// Firmware version banner.
    Version,
}

static COMMANDS: [CommandSpec; 5] = [
    CommandSpec { id: "emf", wire: b"<GETEMF>>", shape: ReplyShape::Scalar { label: "EMF" }, field: "emf_value", unit: Some("mG"), display: "EMF" },
    CommandSpec { id: "ef", wire: b"<GETEF>>", shape: ReplyShape::Scalar { label: "EF" }, field: "ef_value", unit: Some("V/m"), display: "EF" },
    CommandSpec { id: "rf_band", wire: b"<GETBANDDATA>>", shape: ReplyShape::Vector { unit_suffix: " dBm" }, field: "rf_band", unit: Some("dBm"), display: "RF band" },
    CommandSpec { id: "mode", wire: b"<GETMODE>>", shape: ReplyShape::Text, field: "mode", unit: None, display: "Mode" },
    CommandSpec { id: "version", wire: b"<GETVER>>", shape: ReplyShape::Banner { product: "GQ-EMF390v2Re" }, field: "version", unit: None, display: "Version" },
];

impl Command {
    /// Every command, in table order.
    pub const ALL: [Command; 5] = [
        Command::Emf,
        Command::Ef,
        Command::RfBand,
        Command::Mode,
        Command::Version,
    ];

    /// Table row for this command.
    pub fn spec(self) -> &'static CommandSpec {
        &COMMANDS[self as usize]
    }

    /// Stable identifier (`emf`, `rf_band`, ...).
    pub fn id(self) -> &'static str {
        self.spec().id
    }

    /// Bytes sent on the wire.
    pub fn wire(self) -> &'static [u8] {
        self.spec().wire
    }

    /// Expected reply shape.
    pub fn shape(self) -> ReplyShape {
        self.spec().shape
    }

    /// Field name for published points.
    pub fn field(self) -> &'static str {
        self.spec().field
    }

    /// Unit label, if the reading has one.
    pub fn unit(self) -> Option<&'static str> {
        self.spec().unit
    }

    /// Human readable name.
    pub fn display_name(self) -> &'static str {
        self.spec().display
    }

    /// Look a command up by its identifier.
    pub fn from_id(id: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.id() == id)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
