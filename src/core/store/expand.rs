// src/core/store/expand.rs

//! The `value++` / `value+=N` expansion grammar (spec.md §4.A).

use crate::core::errors::AttrdError;

/// Resolves `raw` against `previous` (the prior value for the same
/// attribute/node, if any). Non-expansion values pass through unchanged;
/// `value++` and `value+=N` are parsed as "increment the previous numeric
/// value by 1 or by N", clamped to the `i64` bounds used as this store's
/// infinity sentinel.
pub fn resolve(raw: &str, previous: Option<&str>) -> Result<String, AttrdError> {
    let delta = match raw {
        "value++" => 1i64,
        _ if raw.starts_with("value+=") => raw["value+=".len()..]
            .parse::<i64>()
            .map_err(|_| AttrdError::InvalidInput(format!("not a valid increment: '{raw}'")))?,
        _ => return Ok(raw.to_string()),
    };

    let base: i64 = match previous {
        None => 0,
        Some(p) => p
            .parse()
            .map_err(|_| AttrdError::InvalidInput(format!("cannot increment non-numeric value '{p}'")))?,
    };

    Ok(base.saturating_add(delta).to_string())
}
