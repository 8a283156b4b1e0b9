//! Value-change decoder for the VCD body
//!
//! Resolves scalar and vector changes against the declaration table and hands
//! each one to a caller-supplied sink in file order.

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::header::DeclarationTable;
use crate::scanner::{Scanner, Token, TokenKind};
use crate::types::{Logic, Position, Result};
use tracing::{debug, trace};

/// One resolved value change, borrowed for the duration of the sink call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueChange<'v> {
    /// Absolute time in timescale ticks
    pub time: u64,
    /// Slot of the signal in the declaration table
    pub signal: usize,
    /// Value bits, MSB first, exactly the declared width
    pub value: &'v [Logic],
}

/// Summary of a decoded body
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodySummary {
    /// Last timestamp seen, in ticks
    pub end_time: u64,
    /// Number of changes delivered to the sink
    pub changes: usize,
}

/// Fit `bits` to `width`, left-extending short literals by the VCD rule and
/// dropping the leading bits of long ones. Returns `true` if the widths differed.
pub fn fit_width(bits: &[Logic], width: usize, out: &mut Vec<Logic>) -> bool {
    out.clear();
    if bits.len() >= width {
        out.extend_from_slice(&bits[bits.len() - width..]);
    } else {
        let fill = match bits.first() {
            Some(Logic::Undefined) => Logic::Undefined,
            Some(Logic::Floating) => Logic::Floating,
            _ => Logic::Zero,
        };
        out.resize(width - bits.len(), fill);
        out.extend_from_slice(bits);
    }
    bits.len() != width
}

/// Streaming decoder over body tokens
pub struct Decoder<'s, 'a> {
    scanner: &'s mut Scanner<'a>,
    table: &'s DeclarationTable,
    current_time: u64,
    /// Bits of the literal being decoded
    literal: Vec<Logic>,
    /// Literal fitted to the declared width
    fitted: Vec<Logic>,
}

impl<'s, 'a> Decoder<'s, 'a> {
    pub fn new(scanner: &'s mut Scanner<'a>, table: &'s DeclarationTable) -> Self {
        Self {
            scanner,
            table,
            current_time: 0,
            literal: Vec::new(),
            fitted: Vec::new(),
        }
    }

    /// Decode the whole body, calling `sink` once per resolved change.
    ///
    /// Recoverable problems are recorded and skipped. A decreasing timestamp
    /// stops decoding with `NonMonotonicTime`.
    pub fn run<F>(mut self, diags: &mut Diagnostics, mut sink: F) -> Result<BodySummary>
    where
        F: FnMut(ValueChange<'_>),
    {
        let mut summary = BodySummary::default();

        loop {
            let token = self.scanner.next_token(diags)?;
            match token.kind {
                TokenKind::EndOfFile => break,
                TokenKind::Timestamp(time) => {
                    if time < self.current_time {
                        return Err(diags.fatal(
                            DiagnosticKind::NonMonotonicTime,
                            format!("timestamp #{} follows #{}", time, self.current_time),
                            Some(token.position),
                        ));
                    }
                    trace!(time, "Update timestamp");
                    self.current_time = time;
                }
                TokenKind::Keyword(b"$comment") => self.skip_block(),
                TokenKind::Keyword(keyword) => {
                    // $dumpvars/$dumpall/$dumpon/$dumpoff and their $end carry no data
                    trace!(keyword = %String::from_utf8_lossy(keyword), "Body keyword");
                }
                TokenKind::Scalar(level) => {
                    self.literal.clear();
                    self.literal.push(level);
                    if let Some(signal) = self.resolve(token.position, diags)? {
                        sink(ValueChange {
                            time: self.current_time,
                            signal,
                            value: &self.fitted,
                        });
                        summary.changes += 1;
                    }
                }
                TokenKind::Vector(bits) => {
                    self.literal.clear();
                    self.literal
                        .extend(bits.iter().filter_map(|&b| Logic::from_byte(b)));
                    if let Some(signal) = self.resolve(token.position, diags)? {
                        sink(ValueChange {
                            time: self.current_time,
                            signal,
                            value: &self.fitted,
                        });
                        summary.changes += 1;
                    }
                }
                TokenKind::Real(text) => {
                    let ident = self.scanner.next_token(diags)?;
                    diags.recoverable(
                        DiagnosticKind::UnsupportedValue,
                        format!(
                            "real value 'r{}' for '{}' dropped",
                            String::from_utf8_lossy(text),
                            identifier_text(&ident)
                        ),
                        Some(token.position),
                    )?;
                }
                TokenKind::Identifier(code) => {
                    // Only reachable when a literal was not followed by its code
                    diags.recoverable(
                        DiagnosticKind::MalformedToken,
                        format!("stray identifier '{}'", String::from_utf8_lossy(code)),
                        Some(token.position),
                    )?;
                }
            }
        }

        summary.end_time = self.current_time;
        debug!(changes = summary.changes, end_time = summary.end_time, "Body decoded");
        Ok(summary)
    }

    /// Read the identifier that follows the current literal, resolve it and
    /// fit the literal into `self.fitted`.
    fn resolve(&mut self, position: Position, diags: &mut Diagnostics) -> Result<Option<usize>> {
        let ident = self.scanner.next_token(diags)?;
        let code = match ident.kind {
            TokenKind::Identifier(code) => code,
            _ => {
                diags.recoverable(
                    DiagnosticKind::MalformedToken,
                    "value change without identifier code",
                    Some(position),
                )?;
                return Ok(None);
            }
        };

        let signal = match self.table.lookup(code) {
            Some(signal) => signal,
            None => {
                diags.recoverable(
                    DiagnosticKind::UnknownSignal,
                    format!(
                        "value change for undeclared identifier '{}'",
                        String::from_utf8_lossy(code)
                    ),
                    Some(ident.position),
                )?;
                return Ok(None);
            }
        };

        let decl = self.table.get(signal);
        if fit_width(&self.literal, decl.width, &mut self.fitted) {
            diags.recoverable(
                DiagnosticKind::WidthMismatch,
                format!(
                    "{} bit(s) for {}-bit signal '{}'",
                    self.literal.len(),
                    decl.width,
                    decl.name
                ),
                Some(position),
            )?;
        }

        Ok(Some(signal))
    }

    /// Skip raw words up to and including `$end`
    fn skip_block(&mut self) {
        while let Some(word) = self.scanner.next_word() {
            if word.is_end() {
                break;
            }
        }
    }
}

fn identifier_text(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::Identifier(code) => String::from_utf8_lossy(code).into_owned(),
        _ => String::from("?"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_header;
    use Logic::*;

    const HEADER: &str = "$timescale 1ns $end
        $scope module top $end
        $var wire 1 ! clk $end
        $var reg 4 # bus [3:0] $end
        $upscope $end
        $enddefinitions $end\n";

    fn decode(body: &str) -> (Result<BodySummary>, Vec<(u64, usize, Vec<Logic>)>, Diagnostics) {
        let input = format!("{}{}", HEADER, body);
        let mut scanner = Scanner::new(input.as_bytes());
        let mut diags = Diagnostics::new();
        let header = parse_header(&mut scanner, &mut diags).unwrap();
        let mut changes = Vec::new();
        let summary = Decoder::new(&mut scanner, &header.table).run(&mut diags, |c| {
            changes.push((c.time, c.signal, c.value.to_vec()))
        });
        (summary, changes, diags)
    }

    #[test]
    fn test_scalar_and_vector_changes() {
        let (summary, changes, diags) =
            decode("$dumpvars 0! b0000 # $end #5 1! #7 b1x0z # #9");
        let summary = summary.unwrap();
        assert!(diags.is_empty());
        assert_eq!(summary.end_time, 9);
        assert_eq!(summary.changes, 4);
        assert_eq!(
            changes,
            vec![
                (0, 0, vec![Zero]),
                (0, 1, vec![Zero, Zero, Zero, Zero]),
                (5, 0, vec![One]),
                (7, 1, vec![One, Undefined, Zero, Floating]),
            ]
        );
    }

    #[test]
    fn test_width_mismatch_pads_and_truncates() {
        let (summary, changes, diags) = decode("#0 b1 # #1 bx1 # #2 b110011 # #3 1#");
        assert!(summary.is_ok());
        assert_eq!(diags.count(DiagnosticKind::WidthMismatch), 4);
        assert_eq!(changes[0].2, vec![Zero, Zero, Zero, One]);
        assert_eq!(changes[1].2, vec![Undefined, Undefined, Undefined, One]);
        assert_eq!(changes[2].2, vec![Zero, Zero, One, One]);
        assert_eq!(changes[3].2, vec![Zero, Zero, Zero, One]);
    }

    #[test]
    fn test_unknown_signal_dropped() {
        let (summary, changes, diags) = decode("#0 0! #3 1@ #4 1!");
        assert!(summary.is_ok());
        assert_eq!(diags.count(DiagnosticKind::UnknownSignal), 1);
        assert!(!diags.has_fatal());
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_non_monotonic_time_is_fatal() {
        let (summary, changes, diags) = decode("#10 1! #5 0!");
        assert!(summary.is_err());
        assert_eq!(diags.count(DiagnosticKind::NonMonotonicTime), 1);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_equal_timestamps_allowed() {
        let (summary, _, diags) = decode("#4 1! #4 0! #6");
        assert_eq!(summary.unwrap().end_time, 6);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_comment_and_real_skipped() {
        let (summary, changes, diags) = decode("#0 $comment b12 ?? $end 1! r2.5 ! #1");
        assert!(summary.is_ok());
        assert_eq!(changes.len(), 1);
        assert_eq!(diags.count(DiagnosticKind::UnsupportedValue), 1);
        assert_eq!(diags.count(DiagnosticKind::MalformedToken), 0);
    }

    #[test]
    fn test_fit_width() {
        let mut out = Vec::new();
        assert!(!fit_width(&[One, Zero], 2, &mut out));
        assert_eq!(out, vec![One, Zero]);
        assert!(fit_width(&[Floating], 3, &mut out));
        assert_eq!(out, vec![Floating, Floating, Floating]);
    }
}
