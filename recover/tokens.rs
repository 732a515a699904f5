use ahash::AHashSet;

/// Outcome of reading one item cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemToken {
    Present(u8),
    Missing,
    /// Non-empty text that is neither an affirmative nor a negative token.
    Unrecognised,
}

impl ItemToken {
    pub fn value(self) -> Option<u8> {
        match self {
            Self::Present(v) => Some(v),
            Self::Missing | Self::Unrecognised => None,
        }
    }
}

/// Outcome of reading one reported total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalToken {
    Accepted(u16),
    Missing,
    /// Non-empty text that is not an exact integer within `[0, max]`.
    Rejected,
}

/// Case-insensitive affirmative / negative vocabulary for item cells.
#[derive(Debug, Clone)]
pub struct TokenSet {
    affirmative: AHashSet<String>,
    negative: AHashSet<String>,
}

impl TokenSet {
    pub fn new<S: AsRef<str>>(affirmative: &[S], negative: &[S]) -> Self {
        let fold = |tokens: &[S]| {
            tokens
                .iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<AHashSet<String>>()
        };
        Self {
            affirmative: fold(affirmative),
            negative: fold(negative),
        }
    }

    pub fn parse_item(&self, raw: Option<&str>) -> ItemToken {
        let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
            return ItemToken::Missing;
        };
        let folded = text.to_ascii_lowercase();
        if self.affirmative.contains(&folded) {
            ItemToken::Present(1)
        } else if self.negative.contains(&folded) {
            ItemToken::Present(0)
        } else {
            ItemToken::Unrecognised
        }
    }
}

pub const DEFAULT_AFFIRMATIVE: [&str; 5] = ["y", "yes", "true", "t", "1"];
pub const DEFAULT_NEGATIVE: [&str; 5] = ["n", "no", "false", "f", "0"];

impl Default for TokenSet {
    fn default() -> Self {
        Self::new(&DEFAULT_AFFIRMATIVE, &DEFAULT_NEGATIVE)
    }
}

/// Parses a reported total. Only a run of ASCII digits whose value lies in
/// `[0, max]` is accepted: signs, decimals, exponents and out-of-range values
/// are rejected rather than coerced.
pub fn parse_total(raw: Option<&str>, max: u16) -> TotalToken {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return TotalToken::Missing;
    };
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return TotalToken::Rejected;
    }
    match text.parse::<u32>() {
        Ok(value) if value <= u32::from(max) => TotalToken::Accepted(value as u16),
        _ => TotalToken::Rejected,
    }
}
