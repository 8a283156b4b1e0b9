//! VCD header parser
//!
//! Consumes words from the start of the trace up to `$enddefinitions $end`
//! and builds the declaration table and timescale.

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::scanner::{parse_decimal, Scanner, Word};
use crate::types::{Position, Result, Timescale, VarType, DEFAULT_TIMESCALE};
use std::collections::HashMap;
use tracing::{debug, info, trace};

// ============================================================================
// Declarations
// ============================================================================

/// One `$var` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDeclaration {
    /// Short VCD identifier code, e.g. `!`
    pub code: String,
    /// Fully-qualified name, scopes joined with `.`
    pub name: String,
    /// Reference as declared, without any bit range
    pub reference: String,
    /// Bit range suffix such as `[7:0]`, if declared
    pub range: Option<String>,
    pub width: usize,
    pub var_type: VarType,
    /// Other names the same identifier code was declared under
    pub aliases: Vec<String>,
}

impl SignalDeclaration {
    /// Scope path of this signal, without the reference
    pub fn scope(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(scope, _)| scope)
            .unwrap_or("")
    }
}

/// Mapping from identifier code to declaration.
///
/// Declarations live in a dense vector in declaration order; the index is the
/// signal's slot in every per-signal arena downstream.
#[derive(Debug, Default)]
pub struct DeclarationTable {
    signals: Vec<SignalDeclaration>,
    by_code: HashMap<Vec<u8>, usize>,
}

impl DeclarationTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn lookup(&self, code: &[u8]) -> Option<usize> {
        self.by_code.get(code).copied()
    }

    #[inline]
    pub fn get(&self, index: usize) -> &SignalDeclaration {
        &self.signals[index]
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalDeclaration> {
        self.signals.iter()
    }

    /// Find a declaration by its fully-qualified name
    pub fn find(&self, name: &str) -> Option<&SignalDeclaration> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Insert a declaration. A repeated code with the same width becomes an
    /// alias; a repeated code with a different width is rejected with the
    /// width of the first declaration.
    fn insert(&mut self, decl: SignalDeclaration) -> std::result::Result<(), usize> {
        match self.by_code.get(decl.code.as_bytes()) {
            Some(&idx) => {
                let existing = &mut self.signals[idx];
                if existing.width != decl.width {
                    return Err(existing.width);
                }
                trace!(code = %decl.code, alias = %decl.name, primary = %existing.name, "Alias");
                existing.aliases.push(decl.name);
                Ok(())
            }
            None => {
                self.by_code
                    .insert(decl.code.as_bytes().to_vec(), self.signals.len());
                self.signals.push(decl);
                Ok(())
            }
        }
    }
}

/// Everything read before `$enddefinitions`
#[derive(Debug)]
pub struct Header {
    pub timescale: Timescale,
    pub date: Option<String>,
    pub version: Option<String>,
    pub comments: Vec<String>,
    pub table: DeclarationTable,
}

// ============================================================================
// Parsing
// ============================================================================

/// Collect the words of a `$keyword ... $end` block.
fn read_block<'a>(
    scanner: &mut Scanner<'a>,
    keyword: &Word<'a>,
    diags: &mut Diagnostics,
) -> Result<Vec<Word<'a>>> {
    let mut words = Vec::new();
    loop {
        match scanner.next_word() {
            Some(word) if word.is_end() => return Ok(words),
            Some(word) => words.push(word),
            None => {
                return Err(diags.fatal(
                    DiagnosticKind::UnterminatedHeader,
                    format!("'{}' block is not closed by $end", keyword.as_str()),
                    Some(keyword.position),
                ))
            }
        }
    }
}

fn join_words(words: &[Word<'_>]) -> String {
    words
        .iter()
        .map(|w| w.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_scope_type(word: &str) -> bool {
    matches!(
        word,
        "module" | "task" | "function" | "begin" | "fork" | "generate" | "struct" | "union" | "interface"
    )
}

/// Split `data[7:0]` into `("data", Some("[7:0]"))`
fn split_range(reference: &str) -> (String, Option<String>) {
    match reference.find('[') {
        Some(idx) if idx > 0 && reference.ends_with(']') => (
            reference[..idx].to_string(),
            Some(reference[idx..].to_string()),
        ),
        _ => (reference.to_string(), None),
    }
}

/// Parse the body of a `$var` block into a declaration.
///
/// Returns `Ok(None)` after reporting a malformed declaration.
fn parse_var(
    words: &[Word<'_>],
    scopes: &[String],
    position: Position,
    diags: &mut Diagnostics,
) -> Result<Option<SignalDeclaration>> {
    if words.len() < 4 {
        diags.recoverable(
            DiagnosticKind::MalformedToken,
            format!("$var needs type, width, code and name, got '{}'", join_words(words)),
            Some(position),
        )?;
        return Ok(None);
    }

    let width = match parse_decimal(words[1].text) {
        Some(w) if w >= 1 => w as usize,
        _ => {
            diags.recoverable(
                DiagnosticKind::MalformedToken,
                format!("$var width '{}' is not a positive integer", words[1].as_str()),
                Some(words[1].position),
            )?;
            return Ok(None);
        }
    };

    let var_type = VarType::from(&*words[0].as_str());
    let code = words[2].as_str().into_owned();

    let mut reference = words[3].as_str().into_owned();
    if let Some(extra) = words.get(4) {
        // `data [7:0]` with the range as its own word
        reference.push_str(&extra.as_str());
    }
    // A 1-bit select such as `mem[3]` names its own net
    let (reference, range) = if width > 1 {
        split_range(&reference)
    } else {
        (reference, None)
    };

    let name = scopes
        .iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .chain(std::iter::once(reference.as_str()))
        .collect::<Vec<_>>()
        .join(".");

    Ok(Some(SignalDeclaration {
        code,
        name,
        reference,
        range,
        width,
        var_type,
        aliases: Vec::new(),
    }))
}

/// Parse the header section.
///
/// On return the scanner is positioned at the first body word.
pub fn parse_header(scanner: &mut Scanner<'_>, diags: &mut Diagnostics) -> Result<Header> {
    let mut timescale: Option<Timescale> = None;
    let mut date = None;
    let mut version = None;
    let mut comments = Vec::new();
    let mut table = DeclarationTable::new();
    let mut scopes: Vec<String> = Vec::new();

    loop {
        let word = match scanner.next_word() {
            Some(word) => word,
            None => {
                return Err(diags.fatal(
                    DiagnosticKind::MissingHeader,
                    "end of input before $enddefinitions",
                    Some(scanner.position()),
                ))
            }
        };

        if !word.is_keyword() {
            return Err(diags.fatal(
                DiagnosticKind::MissingHeader,
                format!("expected a header keyword, found '{}'", word.as_str()),
                Some(word.position),
            ));
        }

        match word.text {
            b"$enddefinitions" => {
                read_block(scanner, &word, diags)?;
                break;
            }
            b"$timescale" => {
                let words = read_block(scanner, &word, diags)?;
                let text = join_words(&words);
                let parsed: Timescale = match text.parse() {
                    Ok(ts) => ts,
                    Err(reason) => {
                        diags.recoverable(
                            DiagnosticKind::MalformedToken,
                            format!("{}; keeping default", reason),
                            Some(word.position),
                        )?;
                        continue;
                    }
                };
                match timescale {
                    Some(existing) if existing != parsed => {
                        return Err(diags.fatal(
                            DiagnosticKind::ConflictingTimescale,
                            format!("timescale {} redeclared as {}", existing, parsed),
                            Some(word.position),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        info!(timescale = %parsed, "Setting timescale");
                        timescale = Some(parsed);
                    }
                }
            }
            b"$scope" => {
                let words = read_block(scanner, &word, diags)?;
                // `$scope module top $end`; tolerate a missing type or name
                let name = match words.as_slice() {
                    [] => String::new(),
                    [only] if is_scope_type(&only.as_str()) => String::new(),
                    [.., last] => last.as_str().into_owned(),
                };
                debug!(scope = %name, "Enter scope");
                scopes.push(name);
            }
            b"$upscope" => {
                read_block(scanner, &word, diags)?;
                if let Some(scope) = scopes.pop() {
                    debug!(scope = %scope, "Leave scope");
                }
            }
            b"$var" => {
                let words = read_block(scanner, &word, diags)?;
                if let Some(decl) = parse_var(&words, &scopes, word.position, diags)? {
                    debug!(code = %decl.code, name = %decl.name, width = decl.width, "Declare");
                    let (code, name, width) = (decl.code.clone(), decl.name.clone(), decl.width);
                    if let Err(first_width) = table.insert(decl) {
                        return Err(diags.fatal(
                            DiagnosticKind::ConflictingDeclaration,
                            format!(
                                "identifier '{}' declared with width {} and again as '{}' with width {}",
                                code, first_width, name, width
                            ),
                            Some(word.position),
                        ));
                    }
                }
            }
            b"$date" => date = Some(join_words(&read_block(scanner, &word, diags)?)),
            b"$version" => version = Some(join_words(&read_block(scanner, &word, diags)?)),
            b"$comment" => comments.push(join_words(&read_block(scanner, &word, diags)?)),
            b"$dumpvars" | b"$dumpall" | b"$dumpon" | b"$dumpoff" => {
                return Err(diags.fatal(
                    DiagnosticKind::MissingHeader,
                    format!("'{}' before $enddefinitions", word.as_str()),
                    Some(word.position),
                ));
            }
            _ => {
                trace!(keyword = %word.as_str(), "Skipping header block");
                read_block(scanner, &word, diags)?;
            }
        }
    }

    let timescale = match timescale {
        Some(ts) => ts,
        None => {
            diags.recoverable(
                DiagnosticKind::MissingTimescale,
                format!("no $timescale declared, assuming {}", DEFAULT_TIMESCALE),
                None,
            )?;
            DEFAULT_TIMESCALE
        }
    };

    info!(signals = table.len(), timescale = %timescale, "Header parsed");

    Ok(Header {
        timescale,
        date,
        version,
        comments,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeUnit;

    fn parse(input: &str) -> (Result<Header>, Diagnostics) {
        let mut scanner = Scanner::new(input.as_bytes());
        let mut diags = Diagnostics::new();
        let header = parse_header(&mut scanner, &mut diags);
        (header, diags)
    }

    #[test]
    fn test_parse_hierarchy() {
        let (header, diags) = parse(
            "$date today $end
             $version sim 1.0 $end
             $timescale 10 ps $end
             $scope module top $end
             $var wire 1 ! clk $end
             $scope module cpu $end
             $var reg 8 \" data [7:0] $end
             $upscope $end
             $upscope $end
             $enddefinitions $end",
        );
        let header = header.unwrap();
        assert!(diags.is_empty());
        assert_eq!(header.timescale, Timescale { magnitude: 10, unit: TimeUnit::Ps });
        assert_eq!(header.date.as_deref(), Some("today"));
        assert_eq!(header.version.as_deref(), Some("sim 1.0"));
        assert_eq!(header.table.len(), 2);

        let clk = header.table.get(header.table.lookup(b"!").unwrap());
        assert_eq!(clk.name, "top.clk");
        assert_eq!(clk.width, 1);
        assert_eq!(clk.var_type, VarType::Wire);

        let data = header.table.get(header.table.lookup(b"\"").unwrap());
        assert_eq!(data.name, "top.cpu.data");
        assert_eq!(data.reference, "data");
        assert_eq!(data.range.as_deref(), Some("[7:0]"));
        assert_eq!(data.width, 8);
        assert_eq!(data.scope(), "top.cpu");
    }

    #[test]
    fn test_alias_same_width() {
        let (header, _) = parse(
            "$timescale 1ns $end
             $scope module top $end
             $var wire 1 ! clk $end
             $scope module sub $end
             $var wire 1 ! clk_in $end
             $upscope $end $upscope $end
             $enddefinitions $end",
        );
        let header = header.unwrap();
        assert_eq!(header.table.len(), 1);
        assert_eq!(header.table.get(0).aliases, vec!["top.sub.clk_in".to_string()]);
    }

    #[test]
    fn test_conflicting_declaration_is_fatal() {
        let (header, diags) = parse(
            "$timescale 1ns $end
             $var wire 1 ! a $end
             $var wire 4 ! b $end
             $enddefinitions $end",
        );
        assert!(header.is_err());
        assert_eq!(diags.count(DiagnosticKind::ConflictingDeclaration), 1);
        assert!(diags.has_fatal());
    }

    #[test]
    fn test_missing_enddefinitions() {
        let (header, diags) = parse("$timescale 1ns $end $var wire 1 ! a $end");
        assert!(header.is_err());
        assert_eq!(diags.count(DiagnosticKind::MissingHeader), 1);
    }

    #[test]
    fn test_unterminated_block() {
        let (header, diags) = parse("$timescale 1ns $end $var wire 1 ! a");
        assert!(header.is_err());
        assert_eq!(diags.count(DiagnosticKind::UnterminatedHeader), 1);
    }

    #[test]
    fn test_missing_timescale_defaults() {
        let (header, diags) = parse("$var wire 1 ! a $end $enddefinitions $end");
        assert_eq!(header.unwrap().timescale, DEFAULT_TIMESCALE);
        assert_eq!(diags.count(DiagnosticKind::MissingTimescale), 1);
        assert!(!diags.has_fatal());
    }

    #[test]
    fn test_conflicting_timescale() {
        let (header, diags) = parse("$timescale 1ns $end $timescale 1ps $end $enddefinitions $end");
        assert!(header.is_err());
        assert_eq!(diags.count(DiagnosticKind::ConflictingTimescale), 1);
    }

    #[test]
    fn test_malformed_var_is_recoverable() {
        let (header, diags) = parse(
            "$timescale 1ns $end
             $var wire 0 ! a $end
             $var wire 1 \" b $end
             $enddefinitions $end",
        );
        let header = header.unwrap();
        assert_eq!(header.table.len(), 1);
        assert_eq!(diags.count(DiagnosticKind::MalformedToken), 1);
    }

    #[test]
    fn test_bit_select_keeps_index() {
        let (header, _) = parse(
            "$timescale 1ns $end
             $var wire 1 ! mem[3] $end
             $var wire 1 \" mem[2] $end
             $enddefinitions $end",
        );
        let header = header.unwrap();
        assert_eq!(header.table.get(0).name, "mem[3]");
        assert_eq!(header.table.get(1).name, "mem[2]");
        assert!(header.table.get(0).range.is_none());
    }

    #[test]
    fn test_unnamed_scope_adds_no_separator() {
        let (header, diags) = parse(
            "$timescale 1ns $end
             $scope module $end
             $var wire 1 ! clk $end
             $scope module core $end
             $var wire 1 \" en $end
             $upscope $end
             $upscope $end
             $scope $end
             $var wire 1 # rst $end
             $upscope $end
             $enddefinitions $end",
        );
        let header = header.unwrap();
        assert!(diags.is_empty());
        let names: Vec<_> = header.table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["clk", "core.en", "rst"]);
    }

    #[test]
    fn test_split_range() {
        assert_eq!(split_range("data[7:0]"), ("data".into(), Some("[7:0]".into())));
        assert_eq!(split_range("clk"), ("clk".into(), None));
        assert_eq!(split_range("[odd]"), ("[odd]".into(), None));
    }
}
