//! Word dictionary: the bidirectional token ↔ id map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

pub const UNK: &str = "<unk>";
pub const YOU: &str = "YOU:";
pub const THEM: &str = "THEM:";
pub const PAD: &str = "<pad>";
pub const SELECTION: &str = "<selection>";
pub const EOS: &str = "<eos>";

/// Reserved tokens, in id order.
const RESERVED: [&str; 6] = [UNK, YOU, THEM, PAD, SELECTION, EOS];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct WordDict {
    i2w: Vec<String>,
    w2i: HashMap<String, usize>,
}

impl Default for WordDict {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<String>> for WordDict {
    fn from(words: Vec<String>) -> Self {
        Self::from_words(words)
    }
}

impl From<WordDict> for Vec<String> {
    fn from(dict: WordDict) -> Self {
        dict.i2w
    }
}

impl WordDict {
    /// A dictionary holding only the reserved tokens.
    pub fn new() -> Self {
        let mut dict = Self {
            i2w: Vec::new(),
            w2i: HashMap::new(),
        };
        for w in RESERVED {
            dict.add_word(w);
        }
        dict
    }

    /// Reserved tokens first, then `words` in order, skipping duplicates.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Self::new();
        for w in words {
            dict.add_word(w.as_ref());
        }
        dict
    }

    pub fn add_word(&mut self, word: &str) -> usize {
        if let Some(&idx) = self.w2i.get(word) {
            return idx;
        }
        let idx = self.i2w.len();
        self.i2w.push(word.to_string());
        self.w2i.insert(word.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.i2w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i2w.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.w2i.contains_key(word)
    }

    /// Id of `word`, falling back to `<unk>`.
    pub fn get_idx(&self, word: &str) -> usize {
        self.w2i
            .get(word)
            .or_else(|| self.w2i.get(UNK))
            .copied()
            .unwrap_or(0)
    }

    pub fn get_word(&self, idx: usize) -> Option<&str> {
        self.i2w.get(idx).map(String::as_str)
    }

    /// Encode a word sequence.
    pub fn w2i<S: AsRef<str>>(&self, words: &[S]) -> Vec<usize> {
        words.iter().map(|w| self.get_idx(w.as_ref())).collect()
    }

    /// Decode an id sequence; unknown ids are an error.
    pub fn i2w(&self, ids: &[usize]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&i| {
                self.get_word(i)
                    .map(str::to_string)
                    .ok_or(AgentError::UnknownToken(i))
            })
            .collect()
    }

    pub fn you_idx(&self) -> usize {
        self.get_idx(YOU)
    }

    pub fn them_idx(&self) -> usize {
        self.get_idx(THEM)
    }

    pub fn selection_idx(&self) -> usize {
        self.get_idx(SELECTION)
    }

    pub fn is_role_marker(&self, idx: usize) -> bool {
        idx == self.you_idx() || idx == self.them_idx()
    }

    /// Ids the writer must never produce: unknown, role markers, padding.
    pub fn special_token_ids(&self) -> Vec<usize> {
        [UNK, YOU, THEM, PAD].iter().map(|w| self.get_idx(w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids_are_stable() {
        let d = WordDict::from_words(["the", "dot", "the"]);
        assert_eq!(d.get_idx(UNK), 0);
        assert_eq!(d.you_idx(), 1);
        assert_eq!(d.them_idx(), 2);
        assert_eq!(d.selection_idx(), 4);
        assert_eq!(d.len(), 8);
        assert_eq!(d.special_token_ids(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_word_maps_to_unk() {
        let d = WordDict::from_words(["dot"]);
        assert_eq!(d.w2i(&["dot", "zebra"]), vec![6, 0]);
        assert!(matches!(d.i2w(&[6, 99]), Err(AgentError::UnknownToken(99))));
        assert_eq!(d.i2w(&[1, 6]).unwrap(), vec!["YOU:", "dot"]);
    }

    #[test]
    fn test_serde_as_word_list() {
        let d = WordDict::from_words(["large", "dot"]);
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.starts_with(r#"["<unk>","YOU:""#));
        let back: WordDict = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_idx("dot"), d.get_idx("dot"));
        assert_eq!(back.len(), d.len());
    }
}
