use std::collections::HashMap;

use similarity::SimilarityScore;

/// Symmetric pairwise overall scores. Pairs never inserted score 0.
///
/// Image ids are interned once on insert, so lookups hash two `&str` and
/// never allocate.
#[derive(Debug, Clone, Default)]
pub struct ScoreMatrix {
    slots: HashMap<String, usize>,
    names: Vec<String>,
    scores: HashMap<(usize, usize), f64>,
}

impl ScoreMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, id: &str) -> usize {
        if let Some(&slot) = self.slots.get(id) {
            return slot;
        }
        let slot = self.names.len();
        self.names.push(id.to_string());
        self.slots.insert(id.to_string(), slot);
        slot
    }

    /// Slots ordered so the first names the lexicographically smaller id.
    fn ordered(&self, a: usize, b: usize) -> (usize, usize) {
        if self.names[a] <= self.names[b] {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Insert or overwrite the score of `(a, b)`; self pairs are ignored.
    pub fn insert(&mut self, a: &str, b: &str, score: f64) {
        if a == b {
            return;
        }
        let (a, b) = (self.intern(a), self.intern(b));
        let key = self.ordered(a, b);
        self.scores.insert(key, score);
    }

    pub fn get(&self, a: &str, b: &str) -> f64 {
        self.try_get(a, b).unwrap_or(0.0)
    }

    pub fn try_get(&self, a: &str, b: &str) -> Option<f64> {
        let a = *self.slots.get(a)?;
        let b = *self.slots.get(b)?;
        self.scores.get(&self.ordered(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Every stored pair as `(a, b, score)` with `a < b`.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.scores
            .iter()
            .map(|(&(a, b), s)| (self.names[a].as_str(), self.names[b].as_str(), *s))
    }
}

impl PartialEq for ScoreMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.pairs().all(|(a, b, s)| other.try_get(a, b) == Some(s))
    }
}

impl<'a> FromIterator<&'a SimilarityScore> for ScoreMatrix {
    fn from_iter<T: IntoIterator<Item = &'a SimilarityScore>>(iter: T) -> Self {
        let mut matrix = ScoreMatrix::new();
        for score in iter {
            matrix.insert(&score.image_a, &score.image_b, score.overall_score);
        }
        matrix
    }
}

impl FromIterator<(String, String, f64)> for ScoreMatrix {
    fn from_iter<T: IntoIterator<Item = (String, String, f64)>>(iter: T) -> Self {
        let mut matrix = ScoreMatrix::new();
        for (a, b, score) in iter {
            matrix.insert(&a, &b, score);
        }
        matrix
    }
}
