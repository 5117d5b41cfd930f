//! Referring expressions and the detector contract.

use serde::{Deserialize, Serialize};

use dotref_nn::SpanIndices;

use crate::vocab::{THEM, YOU};

/// A referring expression found in an utterance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markable {
    /// Word positions, counted with the role marker at 0.
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Referents, when known (oracle annotation).
    #[serde(default)]
    pub entities: Vec<usize>,
}

/// Positions used to pool a markable's hidden state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSpan {
    pub start: usize,
    pub end: usize,
    pub sent_end: usize,
}

impl RefSpan {
    pub fn new(start: usize, end: usize, sent_end: usize) -> Self {
        Self { start, end, sent_end }
    }

    pub fn indices(&self) -> SpanIndices {
        [self.start, self.end, self.sent_end]
    }
}

/// Finds referring expressions in an utterance.
///
/// `words` always starts with the `YOU:` marker, whichever side spoke.
pub trait MarkableDetector: Send + Sync {
    fn detect_markables(&self, words: &[String]) -> Vec<(Markable, RefSpan)>;
}

/// Replace a leading `THEM:` with `YOU:`, or prepend `YOU:` if no marker is present.
pub fn normalize_marker<S: AsRef<str>>(words: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(words.len() + 1);
    out.push(YOU.to_string());
    let rest = match words.first().map(|w| w.as_ref()) {
        Some(YOU) | Some(THEM) => &words[1..],
        _ => words,
    };
    out.extend(rest.iter().map(|w| w.as_ref().to_string()));
    out
}

/// Marks every occurrence of a head noun as a single-word markable.
///
/// A stand-in for a learned detector in demos and tests.
#[derive(Clone, Debug, Default)]
pub struct LexiconDetector {
    heads: Vec<String>,
}

impl LexiconDetector {
    pub fn new<I, S>(heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            heads: heads.into_iter().map(Into::into).collect(),
        }
    }
}

impl MarkableDetector for LexiconDetector {
    fn detect_markables(&self, words: &[String]) -> Vec<(Markable, RefSpan)> {
        let sent_end = words.len().saturating_sub(1);
        words
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, w)| self.heads.iter().any(|h| h == *w))
            .map(|(i, w)| {
                let markable = Markable {
                    start: i,
                    end: i,
                    text: w.clone(),
                    entities: Vec::new(),
                };
                (markable, RefSpan::new(i, i, sent_end))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_marker() {
        assert_eq!(normalize_marker(&["THEM:", "a", "dot"]), vec!["YOU:", "a", "dot"]);
        assert_eq!(normalize_marker(&["YOU:", "hi"]), vec!["YOU:", "hi"]);
        assert_eq!(normalize_marker(&["hi"]), vec!["YOU:", "hi"]);
        assert_eq!(normalize_marker::<&str>(&[]), vec!["YOU:"]);
    }

    #[test]
    fn test_lexicon_detector_spans() {
        let det = LexiconDetector::new(["dot", "dots"]);
        let words = normalize_marker(&["THEM:", "large", "dot", "and", "two", "dots", "<eos>"]);
        let found = det.detect_markables(&words);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1.indices(), [2, 2, 6]);
        assert_eq!(found[1].0.text, "dots");
    }
}
