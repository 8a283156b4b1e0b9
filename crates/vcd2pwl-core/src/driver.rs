//! Conversion driver
//!
//! Runs scanner, header parser, decoder and timeline builder in one forward
//! pass over a memory-mapped trace, then emits and writes the waveforms.

use crate::config::ConvertConfig;
use crate::decoder::Decoder;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::emitter::{emit, PwlWaveform};
use crate::header::{parse_header, Header};
use crate::scanner::Scanner;
use crate::timeline::{TimelineBuilder, Timelines};
use crate::types::{Logic, Result, VcdError};
use crate::writer::write_outputs;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// A fully decoded trace
#[derive(Debug)]
pub struct Trace {
    pub header: Header,
    pub timelines: Timelines,
    /// Value changes resolved from the body
    pub changes: usize,
}

impl Trace {
    /// Final timestamp in ticks
    pub fn end_time(&self) -> u64 {
        self.timelines.end_time()
    }
}

/// Decode a trace held in memory
pub fn parse_bytes(data: &[u8], diags: &mut Diagnostics) -> Result<Trace> {
    let mut scanner = Scanner::new(data);
    let header = parse_header(&mut scanner, diags)?;

    let mut builder = TimelineBuilder::new(&header.table, Logic::Undefined);
    let summary = Decoder::new(&mut scanner, &header.table).run(diags, |change| builder.apply(change))?;

    debug!(
        signals = header.table.len(),
        changes = summary.changes,
        end_time = summary.end_time,
        "Trace decoded"
    );

    Ok(Trace {
        header,
        timelines: builder.finish(summary.end_time),
        changes: summary.changes,
    })
}

/// Map and decode the trace at `path`
#[instrument(skip(diags), fields(path = %path.display()))]
pub fn read_trace(path: &Path, diags: &mut Diagnostics) -> Result<Trace> {
    let unreadable = |diags: &mut Diagnostics, e: std::io::Error| {
        diags.fatal(
            DiagnosticKind::UnreadableInput,
            format!("cannot read {}: {}", path.display(), e),
            None,
        )
    };

    let file = File::open(path).map_err(|e| unreadable(diags, e))?;
    let len = file.metadata().map_err(|e| unreadable(diags, e))?.len();
    // Mapping a zero-length file fails on some platforms
    if len == 0 {
        return parse_bytes(&[], diags);
    }

    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| unreadable(diags, e))?;
    info!(
        bytes = mmap.len(),
        mb = mmap.len() as f64 / 1_048_576.0,
        "Mapped trace"
    );
    parse_bytes(&mmap, diags)
}

/// Decode a trace in memory and emit its waveforms without writing anything
pub fn waveforms_from_bytes(
    data: &[u8],
    config: &ConvertConfig,
    diags: &mut Diagnostics,
) -> Result<Vec<PwlWaveform>> {
    config.validate()?;
    let trace = parse_bytes(data, diags)?;
    emit(
        &trace.header.table,
        &trace.timelines,
        trace.header.timescale,
        config,
        diags,
    )
}

// ============================================================================
// Conversion report
// ============================================================================

/// Outcome of one conversion run
#[derive(Debug, Default)]
pub struct ConversionReport {
    /// Files written, in emission order
    pub outputs: Vec<PathBuf>,
    /// Number of emitted waveforms
    pub waveforms: usize,
    /// Final timestamp in femtoseconds
    pub end_time: u64,
    /// Every diagnostic of the run, in recorded order
    pub diagnostics: Diagnostics,
    /// The error that stopped the run, if any
    pub error: Option<VcdError>,
}

impl ConversionReport {
    /// 0 when the run completed without a fatal diagnostic, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() {
            1
        } else {
            self.diagnostics.exit_code()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    /// Write the diagnostics log, ending with the stopping error when it was
    /// not itself a diagnostic.
    pub fn write_log(&self, path: &Path) -> Result<()> {
        // A run that failed before writing outputs has not created the directory
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.diagnostics.write_log(&mut writer)?;
        match &self.error {
            Some(VcdError::Fatal(_)) | None => {}
            Some(other) => writeln!(writer, "# error: {}", other)?,
        }
        writer.flush()?;
        Ok(())
    }
}

/// Name of the deck and log for `input`: its file stem, or `trace`
pub fn output_stem(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("trace")
        .to_string()
}

/// Convert the trace at `input` into PWL files under `out_dir`.
///
/// Never panics on bad input: failures are reported through
/// [`ConversionReport::error`] and the fatal diagnostic that caused them.
#[instrument(skip(config), fields(input = %input.display(), out_dir = %out_dir.display()))]
pub fn convert(input: &Path, out_dir: &Path, config: &ConvertConfig) -> ConversionReport {
    let mut report = ConversionReport {
        diagnostics: if config.strict {
            Diagnostics::strict()
        } else {
            Diagnostics::new()
        },
        ..Default::default()
    };

    match run(input, out_dir, config, &mut report) {
        Ok(()) => info!(
            files = report.outputs.len(),
            waveforms = report.waveforms,
            diagnostics = report.diagnostics.len(),
            "Conversion complete"
        ),
        Err(e) => {
            warn!(error = %e, "Conversion failed");
            report.error = Some(e);
        }
    }
    report
}

fn run(input: &Path, out_dir: &Path, config: &ConvertConfig, report: &mut ConversionReport) -> Result<()> {
    config.validate()?;
    let diags = &mut report.diagnostics;

    let trace = read_trace(input, diags)?;
    info!(
        signals = trace.header.table.len(),
        timescale = %trace.header.timescale,
        "Header parsed"
    );

    let waveforms = emit(
        &trace.header.table,
        &trace.timelines,
        trace.header.timescale,
        config,
        diags,
    )?;
    report.waveforms = waveforms.len();
    report.end_time = trace
        .header
        .timescale
        .ticks_to_femtos(trace.end_time())
        .unwrap_or(0);

    report.outputs = write_outputs(&waveforms, out_dir, &output_stem(input), config, diags)?;
    Ok(())
}
