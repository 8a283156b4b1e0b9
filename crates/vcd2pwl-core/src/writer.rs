//! PWL Artifact Writer
//!
//! Two layouts are supported: one `<time> <voltage>` table per waveform, or a
//! single SPICE deck with one `PWL` voltage source per waveform. Every file is
//! written next to its destination as `<name>.partial` and renamed once
//! complete, so a failed run never leaves a truncated file under the final name.

use crate::config::{ConvertConfig, OutputFormat};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::emitter::PwlWaveform;
use crate::types::Result;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Femtoseconds per second as a power of ten
const FS_EXPONENT: i32 = 15;

// ============================================================================
// Number formatting
// ============================================================================

/// Exact scientific notation in seconds: `0`, `5e-9`, `4.99e-9`, `1.5e-14`.
pub fn format_time(femtos: u64) -> String {
    if femtos == 0 {
        return "0".to_string();
    }
    let digits = femtos.to_string();
    let significant = digits.trim_end_matches('0');
    let exponent = digits.len() as i32 - 1 - FS_EXPONENT;

    let mut out = String::with_capacity(significant.len() + 6);
    out.push_str(&significant[..1]);
    if significant.len() > 1 {
        out.push('.');
        out.push_str(&significant[1..]);
    }
    if exponent != 0 {
        out.push('e');
        out.push_str(&exponent.to_string());
    }
    out
}

/// Fixed notation with `precision` decimals
pub fn format_voltage(voltage: f64, precision: usize) -> String {
    // Avoid printing "-0.0000"
    let voltage = if voltage == 0.0 { 0.0 } else { voltage };
    format!("{:.*}", precision, voltage)
}

/// Replace every byte that is awkward in a file name with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name stem of a waveform in the table layout, `top.bus_3` for bit 3
pub fn table_stem(waveform: &PwlWaveform) -> String {
    match waveform.bit {
        Some(bit) => {
            let suffix = format!("[{}]", bit);
            let base = waveform.name.strip_suffix(&suffix).unwrap_or(&waveform.name);
            format!("{}_{}", sanitize_file_name(base), bit)
        }
        None => sanitize_file_name(&waveform.name),
    }
}

/// Hierarchical node name used when the leaf name is already taken
fn qualified_node(waveform: &PwlWaveform) -> String {
    match waveform.bit {
        Some(bit) => {
            let suffix = format!("[{}]", bit);
            let base = waveform.name.strip_suffix(&suffix).unwrap_or(&waveform.name);
            format!("{}{}", sanitize_file_name(base), suffix)
        }
        None => sanitize_file_name(&waveform.name),
    }
}

// ============================================================================
// Body writers
// ============================================================================

/// Write `<time> <voltage>` lines
pub fn write_table<W: Write>(writer: &mut W, waveform: &PwlWaveform, precision: usize) -> Result<()> {
    for bp in &waveform.breakpoints {
        writeln!(
            writer,
            "{} {}",
            format_time(bp.time),
            format_voltage(bp.voltage, precision)
        )?;
    }
    Ok(())
}

/// Write one `V<node> <node> 0 PWL(...)` card with continuation lines
pub fn write_source<W: Write>(
    writer: &mut W,
    node: &str,
    waveform: &PwlWaveform,
    precision: usize,
) -> Result<()> {
    writeln!(writer, "V{} {} 0 PWL(", node, node)?;
    for bp in &waveform.breakpoints {
        writeln!(
            writer,
            "+ {} {}",
            format_time(bp.time),
            format_voltage(bp.voltage, precision)
        )?;
    }
    writeln!(writer, "+ )")?;
    Ok(())
}

/// Write through `<path>.partial`, renaming on success
fn write_atomic<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let file = File::create(&partial)?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&partial, path)?;
    Ok(())
}

// ============================================================================
// Layouts
// ============================================================================

/// Write one table file per waveform into `out_dir`
#[instrument(skip(waveforms, diags), fields(out_dir = %out_dir.display(), waveforms = waveforms.len()))]
pub fn write_tables(
    waveforms: &[PwlWaveform],
    out_dir: &Path,
    precision: usize,
    diags: &mut Diagnostics,
) -> Result<Vec<PathBuf>> {
    // Resolve file names first so a strict-mode failure writes nothing
    let mut seen = HashSet::new();
    let mut paths = Vec::with_capacity(waveforms.len());
    for waveform in waveforms {
        let mut stem = table_stem(waveform);
        if !seen.insert(stem.clone()) {
            diags.recoverable(
                DiagnosticKind::DuplicateNodeName,
                format!("'{}' maps to an existing file name '{}.pwl'", waveform.name, stem),
                None,
            )?;
            stem = format!("{}_{}", stem, waveform.signal);
            seen.insert(stem.clone());
        }
        paths.push(out_dir.join(format!("{}.pwl", stem)));
    }

    let mut outputs = Vec::with_capacity(waveforms.len());
    for (waveform, path) in waveforms.iter().zip(paths) {
        write_atomic(&path, |w| write_table(w, waveform, precision))?;
        debug!(path = %path.display(), points = waveform.breakpoints.len(), "Wrote table");
        outputs.push(path);
    }

    info!(files = outputs.len(), "Tables written");
    Ok(outputs)
}

/// Write every waveform as a source of one SPICE deck at `path`
#[instrument(skip(waveforms, diags), fields(path = %path.display(), waveforms = waveforms.len()))]
pub fn write_deck(
    waveforms: &[PwlWaveform],
    path: &Path,
    title: &str,
    precision: usize,
    diags: &mut Diagnostics,
) -> Result<()> {
    // Resolve node names first so a strict-mode failure writes nothing
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(waveforms.len());
    for waveform in waveforms {
        let mut node = waveform.node.clone();
        if !seen.insert(node.clone()) {
            let qualified = qualified_node(waveform);
            diags.recoverable(
                DiagnosticKind::DuplicateNodeName,
                format!("node '{}' already used, '{}' written as '{}'", node, waveform.name, qualified),
                None,
            )?;
            node = qualified;
            seen.insert(node.clone());
        }
        nodes.push(node);
    }

    write_atomic(path, |w| {
        writeln!(w, "* {}", title)?;
        for (waveform, node) in waveforms.iter().zip(&nodes) {
            write_source(w, node, waveform, precision)?;
        }
        writeln!(w, ".end")?;
        Ok(())
    })?;

    info!(sources = waveforms.len(), "Deck written");
    Ok(())
}

/// Write `waveforms` in the configured layout. `stem` names the deck.
pub fn write_outputs(
    waveforms: &[PwlWaveform],
    out_dir: &Path,
    stem: &str,
    config: &ConvertConfig,
    diags: &mut Diagnostics,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    match config.format {
        OutputFormat::Table => write_tables(waveforms, out_dir, config.voltage_precision, diags),
        OutputFormat::Spice => {
            let path = out_dir.join(format!("{}.pwl", stem));
            let title = format!("PWL sources converted from {}", stem);
            write_deck(waveforms, &path, &title, config.voltage_precision, diags)?;
            Ok(vec![path])
        }
    }
}
