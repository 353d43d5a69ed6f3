//! Submit-time gate deciding whether command text is structurally closed.
//!
//! This is not a parser. It walks the text once, left to right, keeping an
//! explicit stack of open scopes, and answers a single question: would the
//! shell execute this text as-is, or sit waiting for more input? Nothing is
//! evaluated or rewritten.

use log::trace;

use super::definition::{QuoteRule, ScopePair, ShellDialectSpec};

/// Check whether `text` is a syntactically complete command under `spec`.
///
/// At each position the rules are tried in priority order: escape, string
/// quote, line comment, line continuation, scope delimiter. The text is
/// closed iff the scan ends with no open scope, no unterminated string and
/// no dangling continuation.
pub fn is_closed(spec: &ShellDialectSpec, text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let closed = Scanner::new(spec, &chars).run();
    trace!("is_closed({:?}, {:?}) = {}", spec.name, text, closed);
    closed
}

/// Check whether `text` finishes inside a line comment, so that anything
/// appended to its last line would be commented out.
pub fn ends_in_comment(spec: &ShellDialectSpec, text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let mut scanner = Scanner::new(spec, &chars);
    scanner.run();
    scanner.comment_at_end
}

struct Scanner<'a> {
    spec: &'a ShellDialectSpec,
    chars: &'a [char],
    stack: Vec<&'a ScopePair>,
    comment_at_end: bool,
}

impl<'a> Scanner<'a> {
    fn new(spec: &'a ShellDialectSpec, chars: &'a [char]) -> Self {
        Self {
            spec,
            chars,
            stack: Vec::new(),
            comment_at_end: false,
        }
    }

    fn run(&mut self) -> bool {
        let mut i = 0;
        while i < self.chars.len() {
            let c = self.chars[i];

            if self.spec.escape_chars.contains(&c) {
                // A lone trailing escape asks the shell for another line.
                if i + 1 >= self.chars.len() {
                    return false;
                }
                i += 2;
                continue;
            }

            if let Some(rule) = self.spec.quotes.iter().find(|q| q.quote == c) {
                match self.skip_string(rule, i + 1) {
                    Some(next) => {
                        i = next;
                        continue;
                    }
                    None => return false,
                }
            }

            if self.at_word_start(i) {
                if let Some(len) = longest_match(self.chars, i, &self.spec.line_comments) {
                    i = self.next_newline(i + len);
                    self.comment_at_end = i == self.chars.len();
                    continue;
                }
            }

            if let Some(len) = longest_match(self.chars, i, &self.spec.line_continuations) {
                if self.chars[i + len..].iter().all(|c| c.is_whitespace()) {
                    return false;
                }
                i += len;
                continue;
            }

            if let Some(pair) = self
                .spec
                .scopes
                .iter()
                .find(|p| self.delimiter_at(i, &p.open))
            {
                self.stack.push(pair);
                i += pair.open.chars().count();
                continue;
            }

            if let Some(pair) = self
                .spec
                .scopes
                .iter()
                .find(|p| self.delimiter_at(i, &p.close))
            {
                // Unmatched closers are tolerated (e.g. a `case` arm's `)`).
                if self.stack.last().is_some_and(|top| top.close == pair.close) {
                    self.stack.pop();
                }
                i += pair.close.chars().count();
                continue;
            }

            i += 1;
        }

        self.stack.is_empty()
    }

    /// Consume a string body starting just after the opening quote.
    ///
    /// Returns the index after the closing quote, or `None` if the string
    /// is unterminated.
    fn skip_string(&self, rule: &QuoteRule, mut i: usize) -> Option<usize> {
        while i < self.chars.len() {
            let c = self.chars[i];
            if rule.escapes && self.spec.escape_chars.contains(&c) {
                i += 2;
                continue;
            }
            if c == rule.quote {
                if self.spec.quote_doubling && self.chars.get(i + 1) == Some(&rule.quote) {
                    i += 2;
                    continue;
                }
                return Some(i + 1);
            }
            if c == '\n' && !self.spec.multiline_strings {
                return None;
            }
            i += 1;
        }
        None
    }

    fn next_newline(&self, from: usize) -> usize {
        self.chars[from..]
            .iter()
            .position(|&c| c == '\n')
            .map(|p| from + p)
            .unwrap_or(self.chars.len())
    }

    fn at_word_start(&self, i: usize) -> bool {
        i == 0 || matches!(self.chars[i - 1], ' ' | '\t' | '\n' | '\r' | ';' | '&' | '|')
    }

    /// Match a scope delimiter at `i`; keyword delimiters need word boundaries.
    fn delimiter_at(&self, i: usize, delimiter: &str) -> bool {
        let len = delimiter.chars().count();
        if len == 0 || !starts_with_at(self.chars, i, delimiter) {
            return false;
        }
        if !delimiter.chars().all(is_word_char) {
            return true;
        }
        let before = i == 0 || !is_word_char(self.chars[i - 1]);
        let after = self.chars.get(i + len).is_none_or(|&c| !is_word_char(c));
        before && after
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn starts_with_at(chars: &[char], i: usize, needle: &str) -> bool {
    let mut idx = i;
    for n in needle.chars() {
        if chars.get(idx) != Some(&n) {
            return false;
        }
        idx += 1;
    }
    true
}

/// Length in chars of the longest marker matching at `i`.
fn longest_match(chars: &[char], i: usize, markers: &[String]) -> Option<usize> {
    markers
        .iter()
        .filter(|m| !m.is_empty() && starts_with_at(chars, i, m))
        .map(|m| m.chars().count())
        .max()
}
