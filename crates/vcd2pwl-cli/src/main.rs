//! vcd2pwl: convert a VCD trace into SPICE piecewise-linear sources.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::{debug, info};
use vcd2pwl_core::{
    load_config, output_stem, BusMode, ConversionReport, ConvertConfig, FloatingPolicy,
    OutputFormat, Severity, TimeValue, UndefinedPolicy, VcdError,
};

/// Convert a Value Change Dump into PWL voltage sources.
#[derive(Parser, Debug)]
#[command(name = "vcd2pwl", version, about = "VCD to PWL converter")]
pub struct Cli {
    /// Input VCD trace.
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Directory receiving the PWL files and the log.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    pub debug: bool,

    /// TOML file with conversion settings; flags override it.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Voltage of logic 1.
    #[arg(long, value_name = "VOLTS", allow_negative_numbers = true)]
    pub vdd: Option<f64>,

    /// Voltage of logic 0.
    #[arg(long, value_name = "VOLTS", allow_negative_numbers = true)]
    pub vss: Option<f64>,

    /// Transition time of data signals (e.g. "10ps", "1e-11").
    #[arg(long, value_name = "TIME")]
    pub trf: Option<TimeValue>,

    /// Transition time of clock signals.
    #[arg(long, value_name = "TIME")]
    pub tcrf: Option<TimeValue>,

    /// Leaf names treated as clocks (replaces the configured list).
    #[arg(long = "clock", value_name = "NAME")]
    pub clocks: Vec<String>,

    /// Voltage policy for X: midpoint, hold, low, high or skip.
    #[arg(long, value_name = "POLICY")]
    pub undefined: Option<UndefinedPolicy>,

    /// Voltage policy for Z: hold, midpoint, low or high.
    #[arg(long, value_name = "POLICY")]
    pub floating: Option<FloatingPolicy>,

    /// Vector handling: split or ladder.
    #[arg(long, value_name = "MODE")]
    pub bus: Option<BusMode>,

    /// Output layout: table or spice.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Hierarchical prefix to export; repeatable.
    #[arg(long = "scope", value_name = "PREFIX")]
    pub scopes: Vec<String>,

    /// Decimals written for voltages.
    #[arg(long, value_name = "N")]
    pub precision: Option<usize>,

    /// Treat recoverable diagnostics as fatal.
    #[arg(long)]
    pub strict: bool,

    /// Emit waveforms on all cores.
    #[arg(long)]
    pub parallel: bool,

    /// Log file path (default: <out-dir>/<input stem>.log).
    #[arg(long, value_name = "FILE", conflicts_with = "no_log")]
    pub log: Option<PathBuf>,

    /// Do not write a log file.
    #[arg(long)]
    pub no_log: bool,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn build_config(&self) -> Result<ConvertConfig, VcdError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ConvertConfig::default(),
        };

        if let Some(v) = self.vdd {
            config.high_voltage = v;
        }
        if let Some(v) = self.vss {
            config.low_voltage = v;
        }
        if let Some(t) = self.trf {
            config.transition = t;
        }
        if self.tcrf.is_some() {
            config.clock_transition = self.tcrf;
        }
        if !self.clocks.is_empty() {
            config.clock_signals = self.clocks.clone();
        }
        if let Some(p) = self.undefined {
            config.undefined = p;
        }
        if let Some(p) = self.floating {
            config.floating = p;
        }
        if let Some(m) = self.bus {
            config.bus = m;
        }
        if let Some(f) = self.format {
            config.format = f;
        }
        if !self.scopes.is_empty() {
            config.scopes = self.scopes.clone();
        }
        if let Some(p) = self.precision {
            config.voltage_precision = p;
        }
        config.strict |= self.strict;
        config.parallel |= self.parallel;

        config.validate()?;
        Ok(config)
    }

    /// Where the log goes, or `None` with `--no-log`
    pub fn log_path(&self) -> Option<PathBuf> {
        if self.no_log {
            return None;
        }
        Some(self.log.clone().unwrap_or_else(|| {
            self.out_dir
                .join(format!("{}.log", output_stem(&self.input)))
        }))
    }
}

/// Initialize logging. `RUST_LOG` overrides `level` when set.
fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(report: &ConversionReport) {
    for diag in report.diagnostics.iter() {
        if diag.severity >= Severity::Recoverable {
            eprintln!("{}", diag);
        }
    }
    if let Some(e) = &report.error {
        eprintln!("error: {}", e);
    }
    for path in &report.outputs {
        println!("{}", path.display());
    }
}

fn write_log(report: &ConversionReport, path: &Path) {
    match report.write_log(path) {
        Ok(()) => debug!(path = %path.display(), "Log written"),
        Err(e) => eprintln!("warning: cannot write log {}: {}", path.display(), e),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(if cli.debug { "debug" } else { "info" });

    let config = match cli.build_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    debug!(?config, "Effective configuration");

    let report = vcd2pwl_core::convert(&cli.input, &cli.out_dir, &config);
    if let Some(path) = cli.log_path() {
        write_log(&report, &path);
    }
    print_summary(&report);

    info!(
        exit_code = report.exit_code(),
        files = report.outputs.len(),
        "Done"
    );
    process::exit(report.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_minimal() {
        let cli = Cli::try_parse_from(["vcd2pwl", "-i", "clk.vcd"]).unwrap();
        assert_eq!(cli.input, PathBuf::from("clk.vcd"));
        assert_eq!(cli.out_dir, PathBuf::from("."));
        assert!(!cli.debug);
        assert_eq!(cli.log_path(), Some(PathBuf::from("./clk.log")));

        let config = cli.build_config().unwrap();
        assert_eq!(config.high_voltage, 1.8);
        assert_eq!(config.format, OutputFormat::Table);
    }

    #[test]
    fn parse_input_required() {
        assert!(Cli::try_parse_from(["vcd2pwl"]).is_err());
    }

    #[test]
    fn parse_overrides() {
        let cli = Cli::try_parse_from([
            "vcd2pwl",
            "--input",
            "trace.vcd",
            "--out-dir",
            "out",
            "--vdd",
            "1.2",
            "--vss",
            "-0.3",
            "--trf",
            "20ps",
            "--tcrf",
            "5p",
            "--clock",
            "CLK",
            "--undefined",
            "hold",
            "--floating",
            "mid",
            "--bus",
            "ladder",
            "--format",
            "spice",
            "--scope",
            "tb.dut",
            "--scope",
            "tb.mon",
            "--strict",
            "--debug",
        ])
        .unwrap();

        assert!(cli.debug);
        let config = cli.build_config().unwrap();
        assert_eq!(config.high_voltage, 1.2);
        assert_eq!(config.low_voltage, -0.3);
        assert_eq!(config.transition.femtos(), 20_000);
        assert_eq!(config.transition_for("clk").femtos(), 5_000);
        assert_eq!(config.undefined, UndefinedPolicy::Hold);
        assert_eq!(config.floating, FloatingPolicy::Midpoint);
        assert_eq!(config.bus, BusMode::Ladder);
        assert_eq!(config.format, OutputFormat::Spice);
        assert_eq!(config.scopes, vec!["tb.dut", "tb.mon"]);
        assert!(config.strict);
    }

    #[test]
    fn parse_rejects_bad_values() {
        assert!(Cli::try_parse_from(["vcd2pwl", "-i", "a.vcd", "--trf", "soon"]).is_err());
        assert!(Cli::try_parse_from(["vcd2pwl", "-i", "a.vcd", "--bus", "tree"]).is_err());
        assert!(Cli::try_parse_from(["vcd2pwl", "-i", "a.vcd", "--log", "x", "--no-log"]).is_err());
    }

    #[test]
    fn zero_transition_fails_validation() {
        let cli = Cli::try_parse_from(["vcd2pwl", "-i", "a.vcd", "--trf", "0"]).unwrap();
        assert!(cli.build_config().is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "high_voltage = 3.3\nbus = \"ladder\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from(["vcd2pwl", "-i", "a.vcd", "-c", &path, "--vdd", "2.5"]).unwrap();
        let config = cli.build_config().unwrap();
        assert_eq!(config.high_voltage, 2.5);
        assert_eq!(config.bus, BusMode::Ladder);
    }

    #[test]
    fn no_log_disables_log() {
        let cli = Cli::try_parse_from(["vcd2pwl", "-i", "a.vcd", "--no-log"]).unwrap();
        assert_eq!(cli.log_path(), None);
    }
}
