use std::iter::Peekable;
use std::str::CharIndices;

/// A byte range of a statement, tagged with whether it lies inside a quoted literal.
///
/// Literal spans include their delimiters. Spans are contiguous and cover the
/// whole input in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub in_literal: bool,
}

impl Span {
    #[must_use]
    pub fn text<'a>(&self, input: &'a str) -> &'a str {
        &input[self.start..self.end]
    }

    #[must_use]
    pub const fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Single-pass, quote-aware scanner over a SQL statement.
///
/// `'` and `"` delimit literals independently; inside a literal a doubled
/// delimiter is an escape, not a terminator. An unterminated literal extends
/// to the end of the input. The only state carried between characters is the
/// open delimiter, if any.
pub struct Scanner<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    span_start: usize,
    quote: Option<char>,
    done: bool,
}

impl<'a> Scanner<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Scanner { input, chars: input.char_indices().peekable(), span_start: 0, quote: None, done: false }
    }

    fn emit(&mut self, end: usize, in_literal: bool) -> Option<Span> {
        let span = Span { start: self.span_start, end, in_literal };
        self.span_start = end;
        (span.start < span.end).then_some(span)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while !self.done {
            let Some((idx, ch)) = self.chars.next() else {
                self.done = true;
                let in_literal = self.quote.is_some();
                return self.emit(self.input.len(), in_literal);
            };
            match self.quote {
                None if ch == '\'' || ch == '"' => {
                    self.quote = Some(ch);
                    if let Some(span) = self.emit(idx, false) {
                        return Some(span);
                    }
                }
                None => {}
                Some(q) if ch == q => {
                    if matches!(self.chars.peek(), Some((_, next)) if *next == q) {
                        self.chars.next();
                    } else {
                        self.quote = None;
                        if let Some(span) = self.emit(idx + ch.len_utf8(), true) {
                            return Some(span);
                        }
                    }
                }
                Some(_) => {}
            }
        }
        None
    }
}

/// Scans `input` into its literal and non-literal spans.
#[must_use]
pub fn spans(input: &str) -> Vec<Span> {
    Scanner::new(input).collect()
}

/// Literal spans of a statement, for "does this offset fall inside a quoted literal" checks.
#[derive(Debug, Clone, Default)]
pub struct LiteralMap {
    literals: Vec<(usize, usize)>,
}

impl LiteralMap {
    #[must_use]
    pub fn of(input: &str) -> Self {
        let literals = Scanner::new(input).filter(|s| s.in_literal).map(|s| (s.start, s.end)).collect();
        Self { literals }
    }

    /// True if the byte at `offset` belongs to a literal, delimiters included.
    #[must_use]
    pub fn in_literal(&self, offset: usize) -> bool {
        let idx = self.literals.partition_point(|&(start, _)| start <= offset);
        idx > 0 && offset < self.literals[idx - 1].1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }
}

/// Iterates over the identifier-like words that lie outside literals, with their offsets.
pub fn words(input: &str) -> impl Iterator<Item = (usize, &str)> + '_ {
    Scanner::new(input).filter(|s| !s.in_literal).flat_map(move |span| {
        let text = span.text(input);
        let mut out = Vec::new();
        let mut start = None;
        for (i, ch) in text.char_indices() {
            let word_char = ch.is_alphanumeric() || ch == '_';
            match (word_char, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    out.push((span.start + s, &text[s..i]));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            out.push((span.start + s, &text[s..]));
        }
        out
    })
}
