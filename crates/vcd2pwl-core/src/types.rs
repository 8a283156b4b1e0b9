//! Common types, errors, and constants for VCD to PWL conversion

use crate::diagnostics::Diagnostic;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Constants
// ============================================================================

/// Femtoseconds per second - the internal time resolution
pub const FS_PER_SECOND: u64 = 1_000_000_000_000_000;

/// Timescale applied when a trace declares none (1 ps)
pub const DEFAULT_TIMESCALE: Timescale = Timescale {
    magnitude: 1,
    unit: TimeUnit::Ps,
};

// ============================================================================
// Enums
// ============================================================================

/// Four-state logic level carried by every decoded bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    Zero,
    One,
    /// `x` and the nine-state "unknown" letters
    Undefined,
    /// `z`, high impedance
    Floating,
}

impl Logic {
    /// Decode one value character. Returns `None` for bytes that are not a level.
    #[inline]
    pub fn from_byte(b: u8) -> Option<Logic> {
        match b {
            b'0' | b'l' | b'L' => Some(Logic::Zero),
            b'1' | b'h' | b'H' => Some(Logic::One),
            b'x' | b'X' | b'u' | b'U' | b'w' | b'W' | b'-' => Some(Logic::Undefined),
            b'z' | b'Z' => Some(Logic::Floating),
            _ => None,
        }
    }

    #[inline]
    pub fn as_char(self) -> char {
        match self {
            Logic::Zero => '0',
            Logic::One => '1',
            Logic::Undefined => 'x',
            Logic::Floating => 'z',
        }
    }
}

/// Unit part of a VCD `$timescale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    S,
    Ms,
    Us,
    Ns,
    Ps,
    Fs,
}

impl TimeUnit {
    /// Length of one unit in femtoseconds
    pub fn femtos(self) -> u64 {
        match self {
            TimeUnit::S => FS_PER_SECOND,
            TimeUnit::Ms => 1_000_000_000_000,
            TimeUnit::Us => 1_000_000_000,
            TimeUnit::Ns => 1_000_000,
            TimeUnit::Ps => 1_000,
            TimeUnit::Fs => 1,
        }
    }

    /// Parse a unit, accepting both `ns` and the SPICE scale letter `n`
    pub fn from_suffix(s: &str) -> Option<TimeUnit> {
        match s.to_ascii_lowercase().as_str() {
            "s" => Some(TimeUnit::S),
            "ms" | "m" => Some(TimeUnit::Ms),
            "us" | "u" => Some(TimeUnit::Us),
            "ns" | "n" => Some(TimeUnit::Ns),
            "ps" | "p" => Some(TimeUnit::Ps),
            "fs" | "f" => Some(TimeUnit::Fs),
            _ => None,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::S => "s",
            TimeUnit::Ms => "ms",
            TimeUnit::Us => "us",
            TimeUnit::Ns => "ns",
            TimeUnit::Ps => "ps",
            TimeUnit::Fs => "fs",
        };
        f.write_str(s)
    }
}

/// Declared kind of a `$var`. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarType {
    Wire,
    Reg,
    Integer,
    Real,
    Parameter,
    Event,
    Other(String),
}

impl From<&str> for VarType {
    fn from(s: &str) -> Self {
        match s {
            "wire" | "tri" | "wand" | "wor" | "tri0" | "tri1" | "supply0" | "supply1" => {
                VarType::Wire
            }
            "reg" | "logic" | "bit" => VarType::Reg,
            "integer" | "int" => VarType::Integer,
            "real" | "realtime" => VarType::Real,
            "parameter" => VarType::Parameter,
            "event" => VarType::Event,
            other => VarType::Other(other.to_string()),
        }
    }
}

// ============================================================================
// Timescale
// ============================================================================

/// `(magnitude, unit)` pair read from the header, e.g. `10 ps`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timescale {
    pub magnitude: u32,
    pub unit: TimeUnit,
}

impl Timescale {
    /// Femtoseconds represented by one timestamp tick
    #[inline]
    pub fn femtos_per_tick(&self) -> u64 {
        self.magnitude as u64 * self.unit.femtos()
    }

    /// Convert a tick count to femtoseconds, `None` on overflow
    #[inline]
    pub fn ticks_to_femtos(&self, ticks: u64) -> Option<u64> {
        ticks.checked_mul(self.femtos_per_tick())
    }
}

impl FromStr for Timescale {
    type Err = String;

    /// Accepts `1ns`, `1 ns`, `100ps`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let compact: String = s.split_whitespace().collect();
        let split = compact
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("timescale '{}' has no unit", s.trim()))?;
        let (num, unit) = compact.split_at(split);

        let magnitude: u32 = num
            .parse()
            .map_err(|_| format!("timescale '{}' has no magnitude", s.trim()))?;
        if !matches!(magnitude, 1 | 10 | 100) {
            return Err(format!(
                "timescale magnitude must be 1, 10 or 100, got {}",
                magnitude
            ));
        }
        let unit = match unit {
            "s" | "ms" | "us" | "ns" | "ps" | "fs" => TimeUnit::from_suffix(unit),
            _ => None,
        }
        .ok_or_else(|| format!("unknown timescale unit '{}'", unit))?;

        Ok(Timescale { magnitude, unit })
    }
}

impl fmt::Display for Timescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit)
    }
}

// ============================================================================
// Source positions
// ============================================================================

/// Location of a token in the input trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Byte offset from the start of the file
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for conversion operations
#[derive(Debug, thiserror::Error)]
pub enum VcdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Fatal(Diagnostic),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VcdError>;
