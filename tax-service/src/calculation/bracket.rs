//! Bracket resolution.

use rust_decimal::Decimal;

use crate::models::Bracket;

/// First bracket (in slice order) with `min <= value <= max`.
pub fn resolve_bracket(brackets: &[Bracket], value: Decimal) -> Option<&Bracket> {
    brackets.iter().find(|bracket| bracket.contains(value))
}

/// Rate of the matching bracket. `None` is a bracket miss, which callers
/// treat as a zero contribution rather than an error.
pub fn resolve_rate(brackets: &[Bracket], value: Decimal) -> Option<Decimal> {
    resolve_bracket(brackets, value).map(|bracket| bracket.rate)
}
