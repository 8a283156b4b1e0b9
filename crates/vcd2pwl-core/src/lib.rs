//! # VCD to PWL Converter - Core Library
//!
//! Converts digital simulation traces (Value Change Dump) into piecewise-linear
//! voltage sources for analog and mixed-signal simulators.
//!
//! ## Pipeline
//!
//! raw bytes → tokens → declarations → value changes → timelines → breakpoints → files
//!
//! - Memory-mapped input, decoded in a single forward pass
//! - Four-state logic (`0`, `1`, `X`, `Z`) with configurable voltage policies
//! - Minimum transition time ε on every edge, shrunk when edges crowd together
//! - Per-bit or voltage-ladder output for vectors
//! - Ordered diagnostics with strict mode and exit status
//! - Structured logging via `tracing`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vcd2pwl_core::{convert, ConvertConfig};
//!
//! let config = ConvertConfig::default();
//! let report = convert(Path::new("counter.vcd"), Path::new("out"), &config);
//! for path in &report.outputs {
//!     println!("wrote {}", path.display());
//! }
//! std::process::exit(report.exit_code());
//! ```
//!
//! ## Inspecting a Trace
//!
//! ```rust,no_run
//! let (trace, diagnostics) = vcd2pwl_core::read("counter.vcd").unwrap();
//! println!("Timescale: {}", trace.header.timescale);
//! for signal in trace.header.table.iter() {
//!     println!("{} ({} bits)", signal.name, signal.width);
//! }
//! println!("{} diagnostics", diagnostics.len());
//! ```
//!
//! ## Enabling Logging
//!
//! This library uses `tracing` for structured logging. To see log output,
//! initialize a tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//!
//! let report = vcd2pwl_core::read_and_convert("counter.vcd", "out");
//! ```

mod config;
mod decoder;
mod diagnostics;
mod driver;
mod emitter;
mod header;
mod scanner;
mod timeline;
mod types;
mod writer;

// Re-export public types
pub use types::{
    Logic, Position, Result, TimeUnit, Timescale, VarType, VcdError, DEFAULT_TIMESCALE,
    FS_PER_SECOND,
};

pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};

pub use config::{
    load_config, load_config_from_str, BusMode, ConvertConfig, FloatingPolicy, OutputFormat,
    TimeValue, UndefinedPolicy,
};

// Re-export pipeline stages for advanced use
pub use decoder::{fit_width, BodySummary, Decoder, ValueChange};
pub use emitter::{emit, Breakpoint, LevelMap, PwlWaveform};
pub use header::{parse_header, DeclarationTable, Header, SignalDeclaration};
pub use scanner::{Scanner, Token, TokenKind, Word};
pub use timeline::{SignalTimeline, TimelineBuilder, Timelines};

// Re-export writers
pub use writer::{
    format_time, format_voltage, sanitize_file_name, table_stem, write_deck, write_outputs,
    write_source, write_table, write_tables,
};

pub use driver::{
    output_stem, parse_bytes, read_trace, waveforms_from_bytes, ConversionReport, Trace,
};

use std::path::Path;

// ============================================================================
// Public API Functions
// ============================================================================

/// Read and decode a VCD trace.
///
/// # Returns
/// * `Ok((Trace, Diagnostics))` - Declarations, timelines and every
///   informational or recoverable diagnostic recorded on the way
/// * `Err(VcdError)` - If the file cannot be read or is structurally broken
///
/// # Example
/// ```rust,no_run
/// let (trace, _) = vcd2pwl_core::read("counter.vcd").unwrap();
/// if let Some(clk) = trace.header.table.find("tb.clk") {
///     println!("clk is '{}'", clk.code);
/// }
/// ```
pub fn read<P: AsRef<Path>>(path: P) -> Result<(Trace, Diagnostics)> {
    let mut diags = Diagnostics::new();
    let trace = driver::read_trace(path.as_ref(), &mut diags)?;
    Ok((trace, diags))
}

/// Convert a VCD trace into PWL files under `out_dir`.
///
/// Failures never escape as `Err`: they are recorded in the returned
/// [`ConversionReport`], whose [`exit_code`](ConversionReport::exit_code)
/// is the process status to report.
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    out_dir: Q,
    config: &ConvertConfig,
) -> ConversionReport {
    driver::convert(input.as_ref(), out_dir.as_ref(), config)
}

/// Convert with the default configuration.
pub fn read_and_convert<P: AsRef<Path>, Q: AsRef<Path>>(input: P, out_dir: Q) -> ConversionReport {
    driver::convert(input.as_ref(), out_dir.as_ref(), &ConvertConfig::default())
}
