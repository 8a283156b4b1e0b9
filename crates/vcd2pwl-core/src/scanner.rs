//! Token scanner over VCD text
//!
//! VCD is whitespace-delimited, so the scanner walks the input one word at a
//! time without copying. Header parsing reads raw words through
//! [`Scanner::next_word`]; the body is read through [`Scanner::next_token`],
//! which classifies each word and splits scalar changes such as `1!` into a
//! value token followed by an identifier token.

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::types::{Logic, Position, Result};
use std::borrow::Cow;

/// A raw whitespace-delimited word
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word<'a> {
    pub text: &'a [u8],
    pub position: Position,
}

impl<'a> Word<'a> {
    #[inline]
    pub fn is_end(&self) -> bool {
        self.text == b"$end"
    }

    #[inline]
    pub fn is_keyword(&self) -> bool {
        self.text.first() == Some(&b'$')
    }

    pub fn as_str(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.text)
    }
}

/// Classified body token
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind<'a> {
    /// `$dumpvars`, `$end`, `$comment`, ...
    Keyword(&'a [u8]),
    /// `#<time>`
    Timestamp(u64),
    /// Level of a scalar change; the identifier follows as its own token
    Scalar(Logic),
    /// Bits of a `b<bits>` literal, MSB first
    Vector(&'a [u8]),
    /// Text of an `r<real>` literal
    Real(&'a [u8]),
    /// Identifier code following a value literal
    Identifier(&'a [u8]),
    EndOfFile,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub position: Position,
}

/// Cursor over the trace bytes
pub struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
    line_start: usize,
    /// Identifier split off a scalar change, returned on the next call
    pending: Option<Token<'a>>,
    /// The next word is an identifier code whatever it looks like
    expect_identifier: bool,
    /// The next word belongs to a malformed literal and is discarded
    skip_next: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            line: 1,
            line_start: 0,
            pending: None,
            expect_identifier: false,
            skip_next: false,
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.pos - self.line_start + 1,
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.line_start = self.pos;
            }
        }
    }

    /// Next raw word, `None` at end of input
    pub fn next_word(&mut self) -> Option<Word<'a>> {
        self.skip_whitespace();
        if self.pos >= self.data.len() {
            return None;
        }
        let position = self.position();
        let start = self.pos;
        while let Some(&b) = self.data.get(self.pos) {
            if b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        Some(Word {
            text: &self.data[start..self.pos],
            position,
        })
    }

    /// Next classified body token.
    ///
    /// Words that cannot be classified are reported as `MalformedToken` and
    /// skipped; scanning resumes at the following word.
    pub fn next_token(&mut self, diags: &mut Diagnostics) -> Result<Token<'a>> {
        loop {
            if let Some(token) = self.pending.take() {
                return Ok(token);
            }

            let word = match self.next_word() {
                Some(word) => word,
                None => {
                    return Ok(Token {
                        kind: TokenKind::EndOfFile,
                        position: self.position(),
                    })
                }
            };

            if self.skip_next {
                self.skip_next = false;
                continue;
            }

            if self.expect_identifier {
                self.expect_identifier = false;
                return Ok(Token {
                    kind: TokenKind::Identifier(word.text),
                    position: word.position,
                });
            }

            match self.classify(word) {
                Ok(kind) => {
                    return Ok(Token {
                        kind,
                        position: word.position,
                    })
                }
                Err(reason) => {
                    diags.recoverable(
                        DiagnosticKind::MalformedToken,
                        format!("{}: '{}'", reason, word.as_str()),
                        Some(word.position),
                    )?;
                }
            }
        }
    }

    fn classify(&mut self, word: Word<'a>) -> std::result::Result<TokenKind<'a>, &'static str> {
        let text = word.text;
        let (first, rest) = match text.split_first() {
            Some(split) => split,
            None => return Err("empty token"),
        };

        match first {
            b'$' => Ok(TokenKind::Keyword(text)),
            b'#' => parse_decimal(rest)
                .map(TokenKind::Timestamp)
                .ok_or("invalid timestamp"),
            b'b' | b'B' => {
                if !rest.is_empty() && rest.iter().all(|&b| Logic::from_byte(b).is_some()) {
                    self.expect_identifier = true;
                    Ok(TokenKind::Vector(rest))
                } else {
                    self.skip_next = true;
                    Err("invalid vector literal")
                }
            }
            b'r' | b'R' => {
                if !rest.is_empty() {
                    self.expect_identifier = true;
                    Ok(TokenKind::Real(rest))
                } else {
                    self.skip_next = true;
                    Err("empty real literal")
                }
            }
            _ => match Logic::from_byte(*first) {
                Some(level) if !rest.is_empty() => {
                    let position = Position {
                        offset: word.position.offset + 1,
                        line: word.position.line,
                        column: word.position.column + 1,
                    };
                    self.pending = Some(Token {
                        kind: TokenKind::Identifier(rest),
                        position,
                    });
                    Ok(TokenKind::Scalar(level))
                }
                Some(_) => Err("scalar change without identifier code"),
                None => Err("unrecognized token"),
            },
        }
    }
}

/// Parse an unsigned decimal, `None` on empty input, stray bytes or overflow
pub(crate) fn parse_decimal(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u64, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add((b - b'0') as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> (Vec<TokenKind<'_>>, Diagnostics) {
        let mut scanner = Scanner::new(input.as_bytes());
        let mut diags = Diagnostics::new();
        let mut out = Vec::new();
        loop {
            let token = scanner.next_token(&mut diags).unwrap();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            out.push(token.kind);
        }
        (out, diags)
    }

    #[test]
    fn test_words_and_positions() {
        let mut scanner = Scanner::new(b"$var wire\n  1 ! clk $end");
        let first = scanner.next_word().unwrap();
        assert_eq!(first.text, b"$var");
        assert!(first.is_keyword());
        scanner.next_word().unwrap();
        let one = scanner.next_word().unwrap();
        assert_eq!(one.text, b"1");
        assert_eq!(one.position.line, 2);
        assert_eq!(one.position.column, 3);
        assert_eq!(scanner.next_word().unwrap().text, b"!");
        assert_eq!(scanner.next_word().unwrap().as_str(), "clk");
        assert!(scanner.next_word().unwrap().is_end());
        assert!(scanner.next_word().is_none());
    }

    #[test]
    fn test_body_tokens() {
        let (tokens, diags) = kinds("#10 1! b10x %a r1.5 # $end");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Timestamp(10),
                TokenKind::Scalar(Logic::One),
                TokenKind::Identifier(b"!"),
                TokenKind::Vector(b"10x"),
                TokenKind::Identifier(b"%a"),
                TokenKind::Real(b"1.5"),
                TokenKind::Identifier(b"#"),
                TokenKind::Keyword(b"$end"),
            ]
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_malformed_resynchronizes() {
        let (tokens, diags) = kinds("#5 ?? b102 ! 0\" #x 1");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Timestamp(5),
                TokenKind::Scalar(Logic::Zero),
                TokenKind::Identifier(b"\""),
            ]
        );
        // `??`, `b102` (its identifier is skipped with it), `#x`, bare `1`
        assert_eq!(diags.count(DiagnosticKind::MalformedToken), 4);
    }

    #[test]
    fn test_scalar_identifier_position() {
        let mut scanner = Scanner::new(b"  1abc");
        let mut diags = Diagnostics::new();
        let value = scanner.next_token(&mut diags).unwrap();
        let ident = scanner.next_token(&mut diags).unwrap();
        assert_eq!(value.position.column, 3);
        assert_eq!(ident.position.column, 4);
        assert_eq!(ident.kind, TokenKind::Identifier(b"abc"));
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"0"), Some(0));
        assert_eq!(parse_decimal(b"123456"), Some(123456));
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"12a"), None);
        assert_eq!(parse_decimal(b"99999999999999999999999"), None);
    }
}
