use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a live quote sits relative to an estimated price band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Below,
    Within,
    Above,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Below => "Below",
            Self::Within => "Within",
            Self::Above => "Above",
        };
        f.write_str(s)
    }
}

/// Band edges are inclusive: `quote == low` and `quote == high` are Within.
pub fn classify(low: f64, high: f64, quote: f64) -> Position {
    if quote < low {
        Position::Below
    } else if quote > high {
        Position::Above
    } else {
        Position::Within
    }
}
