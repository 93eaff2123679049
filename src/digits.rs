//! Integer literal cipher.
//!
//! 1eft spells integer literals between `~~` markers and lets five digits be
//! written with look-alike symbols: `@` for 0, `a` for 6, `b` for 7, `c` for 8
//! and `d` for 9. `~~1@@~~` is one hundred.

use thiserror::Error;

pub const MARKER: &str = "~~";

const SUBSTITUTIONS: [(char, char); 5] =
    [('@', '0'), ('a', '6'), ('b', '7'), ('c', '8'), ('d', '9')];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigitError {
    #[error("integer literal `{0}` is missing its `~~` markers")]
    Unmarked(String),
    #[error("integer literal `{0}` does not decode to a 64-bit integer")]
    Invalid(String),
}

/// Decode a marked literal such as `~~4d~~` into its value.
pub fn decode(literal: &str) -> Result<i64, DigitError> {
    let body = literal
        .strip_prefix(MARKER)
        .and_then(|rest| rest.strip_suffix(MARKER))
        .ok_or_else(|| DigitError::Unmarked(literal.to_string()))?;

    let digits: String = body
        .chars()
        .map(|c| {
            SUBSTITUTIONS
                .iter()
                .find(|(symbol, _)| *symbol == c)
                .map_or(c, |(_, digit)| *digit)
        })
        .collect();

    digits
        .parse::<i64>()
        .map_err(|_| DigitError::Invalid(literal.to_string()))
}

/// Spell a value the way the cipher expects, substituting every digit that
/// has a look-alike.
pub fn encode(value: i64) -> String {
    let body: String = value
        .to_string()
        .chars()
        .map(|c| {
            SUBSTITUTIONS
                .iter()
                .find(|(_, digit)| *digit == c)
                .map_or(c, |(symbol, _)| *symbol)
        })
        .collect();
    format!("{MARKER}{body}{MARKER}")
}
