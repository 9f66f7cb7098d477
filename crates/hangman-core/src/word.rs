//! Secret word bookkeeping for a single match.
//!
//! Pure state, no I/O. Only the master's gameplay loop mutates it.

/// Placeholder shown for letters that have not been revealed yet.
pub const HIDDEN: char = '_';

/// The secret word and the pattern revealed so far.
#[derive(Debug, Clone)]
pub struct WordTracker {
    word: Vec<char>,
    revealed: Vec<bool>,
    revealed_count: usize,
}

impl WordTracker {
    /// Track a new secret word. The word is lowercased.
    pub fn new(word: &str) -> Self {
        let word: Vec<char> = word.to_lowercase().chars().collect();
        let revealed = vec![false; word.len()];
        Self {
            word,
            revealed,
            revealed_count: 0,
        }
    }

    /// Reveal every occurrence of `letter`.
    ///
    /// Returns true if the letter occurs in the word. Applying a letter that
    /// is already revealed reports it as found but never bumps the count.
    pub fn apply_letter(&mut self, letter: char) -> bool {
        let letter = letter.to_ascii_lowercase();
        let mut found = false;
        for (i, c) in self.word.iter().enumerate() {
            if *c == letter {
                found = true;
                if !self.revealed[i] {
                    self.revealed[i] = true;
                    self.revealed_count += 1;
                }
            }
        }
        found
    }

    pub fn is_solved(&self) -> bool {
        self.revealed_count == self.word.len()
    }

    /// The word with unrevealed positions replaced by [`HIDDEN`].
    pub fn revealed_pattern(&self) -> String {
        self.word
            .iter()
            .zip(&self.revealed)
            .map(|(c, shown)| if *shown { *c } else { HIDDEN })
            .collect()
    }

    pub fn full_word(&self) -> String {
        self.word.iter().collect()
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed_count
    }

    pub fn len(&self) -> usize {
        self.word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }
}

/// Check a candidate secret word: non-empty, ASCII letters only.
pub fn is_valid_word(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic())
}
