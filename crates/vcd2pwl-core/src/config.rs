//! Conversion settings and their TOML loader.
//!
//! ```toml
//! high_voltage = 1.2
//! transition = "20ps"
//! clock_transition = "5ps"
//! clock_signals = ["clk", "ref_clk"]
//! undefined = "hold"
//! floating = "midpoint"
//! bus = "ladder"
//! format = "spice"
//! scopes = ["tb.dut"]
//! ```

use crate::types::{Result, TimeUnit, VcdError, FS_PER_SECOND};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// Time values
// ============================================================================

/// A duration in femtoseconds, written as `10ps`, `0.5ns`, `10p` or `1e-11`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct TimeValue(pub u64);

impl TimeValue {
    pub fn from_picos(ps: u64) -> Self {
        TimeValue(ps * TimeUnit::Ps.femtos())
    }

    #[inline]
    pub fn femtos(self) -> u64 {
        self.0
    }
}

impl FromStr for TimeValue {
    type Err = VcdError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        // Split the numeric part from a trailing unit, keeping any exponent
        let split = s
            .char_indices()
            .find(|&(i, c)| {
                c.is_ascii_alphabetic() && !((c == 'e' || c == 'E') && is_exponent(s, i))
            })
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| VcdError::Config(format!("invalid time '{}'", s)))?;
        let scale = match unit.trim() {
            "" => FS_PER_SECOND,
            u => TimeUnit::from_suffix(u)
                .ok_or_else(|| VcdError::Config(format!("unknown time unit '{}'", u)))?
                .femtos(),
        };

        let femtos = (value * scale as f64).round();
        if !femtos.is_finite() || femtos < 0.0 || femtos > u64::MAX as f64 {
            return Err(VcdError::Config(format!("time '{}' out of range", s)));
        }
        Ok(TimeValue(femtos as u64))
    }
}

/// `e` at `i` belongs to a number like `1e-11` rather than starting a unit
fn is_exponent(s: &str, i: usize) -> bool {
    let before = s[..i].chars().last().is_some_and(|c| c.is_ascii_digit() || c == '.');
    let after = s[i + 1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+');
    before && after
}

impl TryFrom<String> for TimeValue {
    type Error = VcdError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}fs", self.0)
    }
}

// ============================================================================
// Policies
// ============================================================================

macro_rules! keyword_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $($text:literal)|+),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl FromStr for $name {
            type Err = VcdError;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_lowercase().as_str() {
                    $($($text)|+ => Ok($name::$variant),)+
                    other => Err(VcdError::Config(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

keyword_enum!(
    /// Voltage used for `X`
    UndefinedPolicy {
        Midpoint => "midpoint" | "mid",
        Hold => "hold" | "hold-previous",
        Low => "low" | "0",
        High => "high" | "1",
        Skip => "skip",
    }
);

keyword_enum!(
    /// Voltage used for `Z`
    FloatingPolicy {
        Hold => "hold" | "hold-previous",
        Midpoint => "midpoint" | "mid",
        Low => "low" | "0",
        High => "high" | "1",
    }
);

keyword_enum!(
    /// How multi-bit signals become waveforms
    BusMode {
        Split => "split" | "bits",
        Ladder => "ladder" | "bus",
    }
);

keyword_enum!(
    /// Layout of the written PWL artifacts
    OutputFormat {
        Table => "table",
        Spice => "spice" | "deck",
    }
);

// ============================================================================
// Configuration
// ============================================================================

/// Everything that shapes the emitted waveforms
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// Voltage of logic 1
    pub high_voltage: f64,
    /// Voltage of logic 0
    pub low_voltage: f64,
    /// Minimum transition time ε
    pub transition: TimeValue,
    /// ε for clock signals, defaults to `transition`
    pub clock_transition: Option<TimeValue>,
    /// Leaf names treated as clocks, matched case-insensitively
    pub clock_signals: Vec<String>,
    pub undefined: UndefinedPolicy,
    pub floating: FloatingPolicy,
    pub bus: BusMode,
    pub format: OutputFormat,
    /// Hierarchical prefixes to export; empty exports every signal
    pub scopes: Vec<String>,
    /// Escalate recoverable diagnostics to fatal
    pub strict: bool,
    /// Emit waveforms on the rayon pool
    pub parallel: bool,
    /// Decimals written for voltages
    pub voltage_precision: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            high_voltage: 1.8,
            low_voltage: 0.0,
            transition: TimeValue::from_picos(10),
            clock_transition: None,
            clock_signals: vec!["clk".to_string()],
            undefined: UndefinedPolicy::Midpoint,
            floating: FloatingPolicy::Hold,
            bus: BusMode::Split,
            format: OutputFormat::Table,
            scopes: Vec::new(),
            strict: false,
            parallel: false,
            voltage_precision: 4,
        }
    }
}

impl ConvertConfig {
    /// ε for a signal with the given leaf name
    pub fn transition_for(&self, reference: &str) -> TimeValue {
        if self.is_clock(reference) {
            self.clock_transition.unwrap_or(self.transition)
        } else {
            self.transition
        }
    }

    pub fn is_clock(&self, reference: &str) -> bool {
        self.clock_signals
            .iter()
            .any(|c| c.eq_ignore_ascii_case(reference))
    }

    /// Whether a fully-qualified name falls under the scope filter
    pub fn exports(&self, name: &str) -> bool {
        self.scopes.is_empty()
            || self.scopes.iter().any(|scope| {
                name == scope
                    || (name.starts_with(scope.as_str())
                        && name[scope.len()..].starts_with('.'))
            })
    }

    /// Check that the settings describe a usable conversion
    pub fn validate(&self) -> Result<()> {
        if self.transition.femtos() == 0 {
            return Err(VcdError::Config("transition must be greater than zero".into()));
        }
        if self.clock_transition.is_some_and(|t| t.femtos() == 0) {
            return Err(VcdError::Config(
                "clock_transition must be greater than zero".into(),
            ));
        }
        if !self.high_voltage.is_finite() || !self.low_voltage.is_finite() {
            return Err(VcdError::Config("voltages must be finite".into()));
        }
        if self.voltage_precision > 12 {
            return Err(VcdError::Config(format!(
                "voltage_precision {} exceeds 12",
                self.voltage_precision
            )));
        }
        Ok(())
    }
}

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<ConvertConfig> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parse and validate configuration text
pub fn load_config_from_str(content: &str) -> Result<ConvertConfig> {
    let config: ConvertConfig =
        toml::from_str(content).map_err(|e| VcdError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
