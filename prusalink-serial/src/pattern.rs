//! Line patterns used to route incoming printer output.
//!
//! The wire-format contract (spec §4.3.1/§6) is expressed as a handful of
//! anchored patterns. The teacher (`print3rs-core::response`) prefers
//! `winnow` parser combinators over a runtime regex engine for this kind of
//! matching, so a pattern here is just a boxed predicate/extractor rather
//! than a `regex::Regex` — nothing else in this workspace needs the `regex`
//! crate.

use std::sync::Arc;

/// Capture groups pulled out of a matched line, in match order.
pub type Captures = Vec<String>;

trait LineMatch: Send + Sync {
    fn match_line(&self, line: &str) -> Option<Captures>;
}

impl<F> LineMatch for F
where
    F: Fn(&str) -> Option<Captures> + Send + Sync,
{
    fn match_line(&self, line: &str) -> Option<Captures> {
        self(line)
    }
}

/// A reusable, cloneable line matcher.
#[derive(Clone)]
pub struct Pattern(Arc<dyn LineMatch>);

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pattern(..)")
    }
}

impl Pattern {
    pub fn new(matcher: impl Fn(&str) -> Option<Captures> + Send + Sync + 'static) -> Self {
        Self(Arc::new(matcher))
    }

    /// Matches a line equal to `text` once surrounding whitespace is trimmed.
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |line| (line.trim() == text).then(Vec::new))
    }

    /// Matches any line beginning with `prefix`, capturing the remainder.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |line| {
            line.trim()
                .strip_prefix(prefix.as_str())
                .map(|rest| vec![rest.to_owned()])
        })
    }

    /// Wraps a `winnow` parser function as a pattern: the parser is expected
    /// to consume the whole (trimmed) line and its output becomes a single
    /// capture via `Display`.
    pub fn parser<T, P>(mut parse: P) -> Self
    where
        T: std::fmt::Display + 'static,
        P: FnMut(&mut &str) -> winnow::PResult<T> + Send + Sync + 'static,
    {
        use std::sync::Mutex;
        use winnow::Parser;
        let parse = Mutex::new(parse);
        Self::new(move |line| {
            let mut input = line.trim();
            let mut guard = parse.lock().unwrap();
            guard
                .parse_next(&mut input)
                .ok()
                .map(|value| vec![value.to_string()])
        })
    }

    pub fn matches(&self, line: &str) -> Option<Captures> {
        self.0.match_line(line)
    }
}

/// The bare `ok` confirmation terminator (spec §6).
pub fn ok_terminator() -> Pattern {
    Pattern::literal("ok")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literal_matches_trimmed_line() {
        let p = Pattern::literal("ok");
        assert_eq!(p.matches("ok"), Some(vec![]));
        assert_eq!(p.matches("  ok  \r"), Some(vec![]));
        assert_eq!(p.matches("okay"), None);
    }

    #[test]
    fn prefix_captures_remainder() {
        let p = Pattern::prefix("echo:busy: ");
        assert_eq!(
            p.matches("echo:busy: processing"),
            Some(vec!["processing".to_owned()])
        );
        assert_eq!(p.matches("echo:other"), None);
    }
}
