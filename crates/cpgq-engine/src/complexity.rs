//! Static complexity scoring for queries.
//!
//! The score biases two executor decisions: queries scoring at or below
//! [`defaults::HOT_COMPLEXITY`] are cached in the hot tier, and queries at or
//! above [`defaults::SLOW_COMPLEXITY`] get a longer timeout.
//!
//! | Factor | Contribution |
//! |--------|--------------|
//! | Base | 1 |
//! | Length | `chars / 100`, at most 3 |
//! | Parenthesis nesting | max depth, at most 3 |
//! | Expensive operations | 1 per distinct keyword present |

use cpgq_core::defaults;
use serde::Serialize;

/// Operations known to trigger whole-graph traversals on the backend.
pub const EXPENSIVE_OPERATIONS: &[&str] = &["repeat", "flows", "reachableBy", "sinks", "sources"];

const MIN_SCORE: u8 = 1;
const MAX_SCORE: u8 = 10;
const LENGTH_STEP: usize = 100;
const LENGTH_CAP: usize = 3;
const NESTING_CAP: usize = 3;
const SECONDS_PER_POINT: f64 = 0.5;

/// Complexity estimate for one query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexityScore {
    /// Overall score, 1 (trivial) to 10 (very expensive).
    pub score: u8,
    /// Rough wall-clock estimate in seconds.
    pub estimated_seconds: f64,
    /// Scheduling priority, 5 (highest) to 1 (lowest).
    pub priority: u8,
    /// Query length in characters.
    pub text_length: usize,
    /// Deepest parenthesis nesting seen.
    pub nesting_depth: usize,
}

impl ComplexityScore {
    /// Whether results should start in the hot cache tier.
    pub fn is_hot(&self) -> bool {
        self.score <= defaults::HOT_COMPLEXITY
    }

    /// Whether the query deserves a longer timeout.
    pub fn is_slow(&self) -> bool {
        self.score >= defaults::SLOW_COMPLEXITY
    }
}

/// Score `text`. Deterministic and free of side effects.
pub fn score(text: &str) -> ComplexityScore {
    let text_length = text.chars().count();
    let nesting_depth = max_nesting_depth(text);

    let length_points = (text_length / LENGTH_STEP).min(LENGTH_CAP);
    let nesting_points = nesting_depth.min(NESTING_CAP);
    let operation_points = EXPENSIVE_OPERATIONS
        .iter()
        .filter(|op| text.contains(*op))
        .count();

    let total = 1 + length_points + nesting_points + operation_points;
    let score = total.clamp(MIN_SCORE as usize, MAX_SCORE as usize) as u8;

    ComplexityScore {
        score,
        estimated_seconds: f64::from(score) * SECONDS_PER_POINT,
        priority: priority_for(score),
        text_length,
        nesting_depth,
    }
}

/// Lower complexity means higher priority.
fn priority_for(score: u8) -> u8 {
    (6i16 - i16::from(score / 2)).clamp(1, 5) as u8
}

/// Deepest `(` nesting in a single left-to-right pass.
///
/// A `)` with nothing open is ignored rather than driving the depth negative.
fn max_nesting_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max_depth
}
