//! Sentiment scoring.
//!
//! The pipeline only needs `score(text) -> f64` in [-1, 1]. `LexiconScorer`
//! is a small word-valence scorer: it sums the valence of known words, flips
//! the sign after a negator, boosts after an intensifier, and squashes the
//! total into a compound score with `x / sqrt(x² + 15)`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Opaque text scorer.
pub trait SentimentScorer: Send + Sync {
    /// Compound polarity of `text`, in [-1, 1].
    fn score(&self, text: &str) -> f64;
}

/// Normalization constant for the compound score.
const ALPHA: f64 = 15.0;

/// Multiplier applied to a word directly after an intensifier.
const INTENSIFIER_BOOST: f64 = 1.3;

/// Multiplier applied within the window after a negator.
const NEGATION_SCALE: f64 = -0.74;

/// How many following tokens a negator affects.
const NEGATION_WINDOW: usize = 3;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z']*").expect("static regex"));

const DEFAULT_LEXICON: &[(&str, f64)] = &[
    ("amazing", 2.8),
    ("awesome", 3.1),
    ("best", 3.2),
    ("broken", -1.8),
    ("awful", -2.0),
    ("bad", -2.5),
    ("boring", -1.3),
    ("clean", 1.7),
    ("fun", 2.3),
    ("favorite", 2.0),
    ("fair", 1.3),
    ("good", 1.9),
    ("great", 3.1),
    ("happy", 2.7),
    ("hate", -2.7),
    ("like", 1.5),
    ("love", 3.2),
    ("nice", 1.8),
    ("op", -0.8),
    ("overpowered", -1.0),
    ("sad", -2.1),
    ("strong", 2.3),
    ("stronger", 1.8),
    ("terrible", -2.5),
    ("trash", -1.5),
    ("ugly", -2.3),
    ("useless", -1.8),
    ("weak", -1.9),
    ("win", 2.8),
    ("worst", -3.1),
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "isn't", "don't", "doesn't", "can't", "won't", "ain't",
];

const INTENSIFIERS: &[&str] = &["very", "really", "so", "extremely", "super", "totally"];

/// Word-valence scorer with negation and intensifier handling.
#[derive(Debug, Clone)]
pub struct LexiconScorer {
    lexicon: HashMap<String, f64>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            lexicon: DEFAULT_LEXICON
                .iter()
                .map(|(w, v)| ((*w).to_string(), *v))
                .collect(),
        }
    }
}

impl LexiconScorer {
    /// A scorer with no words at all.
    pub fn empty() -> Self {
        Self {
            lexicon: HashMap::new(),
        }
    }

    /// Add or override a word valence. Words are matched lowercase.
    pub fn with_word(mut self, word: &str, valence: f64) -> Self {
        self.lexicon.insert(word.to_lowercase(), valence);
        self
    }

    fn raw_valence(&self, text: &str) -> f64 {
        let tokens: Vec<String> = TOKEN_RE
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();

        let mut total = 0.0;
        let mut negated_for = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            if NEGATORS.contains(&token.as_str()) || token.ends_with("n't") {
                negated_for = NEGATION_WINDOW;
                continue;
            }

            if let Some(&valence) = self.lexicon.get(token) {
                let mut v = valence;
                if i > 0 && INTENSIFIERS.contains(&tokens[i - 1].as_str()) {
                    v *= INTENSIFIER_BOOST;
                }
                if negated_for > 0 {
                    v *= NEGATION_SCALE;
                }
                total += v;
            }
            negated_for = negated_for.saturating_sub(1);
        }

        let exclamations = text.matches('!').count().min(4) as f64;
        if total > 0.0 {
            total += exclamations * 0.292;
        } else if total < 0.0 {
            total -= exclamations * 0.292;
        }
        total
    }
}

/// Squash an unbounded valence sum into [-1, 1].
pub fn normalize(score: f64) -> f64 {
    if score == 0.0 || !score.is_finite() {
        return 0.0;
    }
    (score / (score * score + ALPHA).sqrt()).clamp(-1.0, 1.0)
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        normalize(self.raw_valence(text))
    }
}
