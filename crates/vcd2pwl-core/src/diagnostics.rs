//! Diagnostic records accumulated across a conversion pass.
//!
//! Every component reports through one [`Diagnostics`] accumulator handed down
//! by `&mut`, so the record order is the order in which the trace was read.

use crate::types::{Position, VcdError};
use std::fmt;
use std::io::Write;
use tracing::{debug, error, warn};

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Severity {
    /// Approximations the converter made on its own; never affects exit status.
    Info,
    /// The converter resynchronized and continued.
    Recoverable,
    /// Processing of the trace stopped.
    Fatal,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        self == Severity::Fatal
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Recoverable => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// What went wrong (or what was approximated).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DiagnosticKind {
    // Informational
    RunCollapsed,
    EpsilonShrunk,
    InstantTransition,
    SignalSkipped,
    // Recoverable
    MalformedToken,
    WidthMismatch,
    UnknownSignal,
    UnsupportedValue,
    MissingTimescale,
    DuplicateNodeName,
    // Fatal
    ConflictingDeclaration,
    ConflictingTimescale,
    NonMonotonicTime,
    MissingHeader,
    UnterminatedHeader,
    UnreadableInput,
    TimeOverflow,
}

impl DiagnosticKind {
    /// Severity before any strict-mode escalation
    pub fn severity(self) -> Severity {
        use DiagnosticKind::*;
        match self {
            RunCollapsed | EpsilonShrunk | InstantTransition | SignalSkipped => Severity::Info,
            MalformedToken | WidthMismatch | UnknownSignal | UnsupportedValue
            | MissingTimescale | DuplicateNodeName => Severity::Recoverable,
            ConflictingDeclaration | ConflictingTimescale | NonMonotonicTime | MissingHeader
            | UnterminatedHeader | UnreadableInput | TimeOverflow => Severity::Fatal,
        }
    }

    pub fn name(self) -> &'static str {
        use DiagnosticKind::*;
        match self {
            RunCollapsed => "RunCollapsed",
            EpsilonShrunk => "EpsilonShrunk",
            InstantTransition => "InstantTransition",
            SignalSkipped => "SignalSkipped",
            MalformedToken => "MalformedToken",
            WidthMismatch => "WidthMismatch",
            UnknownSignal => "UnknownSignal",
            UnsupportedValue => "UnsupportedValue",
            MissingTimescale => "MissingTimescale",
            DuplicateNodeName => "DuplicateNodeName",
            ConflictingDeclaration => "ConflictingDeclaration",
            ConflictingTimescale => "ConflictingTimescale",
            NonMonotonicTime => "NonMonotonicTime",
            MissingHeader => "MissingHeader",
            UnterminatedHeader => "UnterminatedHeader",
            UnreadableInput => "UnreadableInput",
            TimeOverflow => "TimeOverflow",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded diagnostic
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub position: Option<Position>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, position: Option<Position>) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.severity, self.kind)?;
        if let Some(pos) = self.position {
            write!(f, " at {}", pos)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Ordered accumulator of diagnostics for one conversion run.
///
/// In strict mode every recoverable diagnostic is escalated to fatal.
#[derive(Debug, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
    strict: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            records: Vec::new(),
            strict: true,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Record a diagnostic, applying strict escalation. Returns the effective severity.
    pub fn push(&mut self, mut diag: Diagnostic) -> Severity {
        if self.strict && diag.severity == Severity::Recoverable {
            diag.severity = Severity::Fatal;
        }
        match diag.severity {
            Severity::Info => debug!(kind = %diag.kind, "{}", diag.message),
            Severity::Recoverable => warn!(kind = %diag.kind, position = ?diag.position, "{}", diag.message),
            Severity::Fatal => error!(kind = %diag.kind, position = ?diag.position, "{}", diag.message),
        }
        let severity = diag.severity;
        self.records.push(diag);
        severity
    }

    /// Record an informational note.
    pub fn info(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(kind, message, None));
    }

    /// Record a recoverable problem. Fails only when strict mode escalated it.
    pub fn recoverable(
        &mut self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: Option<Position>,
    ) -> Result<(), VcdError> {
        let diag = Diagnostic::new(kind, message, position);
        let stored = diag.clone();
        if self.push(diag).is_fatal() {
            return Err(VcdError::Fatal(Diagnostic {
                severity: Severity::Fatal,
                ..stored
            }));
        }
        Ok(())
    }

    /// Record a fatal problem and hand back the error that stops the pass.
    pub fn fatal(
        &mut self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: Option<Position>,
    ) -> VcdError {
        let mut diag = Diagnostic::new(kind, message, position);
        diag.severity = Severity::Fatal;
        self.push(diag.clone());
        VcdError::Fatal(diag)
    }

    /// Append records produced elsewhere, e.g. by a parallel emission job.
    /// They were already escalated where they were created.
    pub fn extend(&mut self, other: Diagnostics) {
        self.records.extend(other.records);
    }

    pub fn has_fatal(&self) -> bool {
        self.records.iter().any(|d| d.severity.is_fatal())
    }

    /// Process exit status implied by the recorded severities
    pub fn exit_code(&self) -> i32 {
        if self.has_fatal() {
            1
        } else {
            0
        }
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.records.iter().filter(|d| d.kind == kind).count()
    }

    pub fn count_severity(&self, severity: Severity) -> usize {
        self.records.iter().filter(|d| d.severity == severity).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write one line per diagnostic, in recorded order.
    pub fn write_log<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for diag in &self.records {
            writeln!(writer, "{}", diag)?;
        }
        writeln!(
            writer,
            "# {} fatal, {} warning, {} info",
            self.count_severity(Severity::Fatal),
            self.count_severity(Severity::Recoverable),
            self.count_severity(Severity::Info)
        )
    }
}
