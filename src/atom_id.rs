use crate::error::{Error, Result};

/// Prefix shared by every atom identifier.
pub const ID_PREFIX: &str = "K-";

/// Number of zero-padded digits after the prefix.
pub const ID_DIGITS: usize = 6;

/// Format a sequence number as an atom ID (e.g. `K-000042`).
pub fn format_id(number: u64) -> String {
    format!("{ID_PREFIX}{number:0width$}", width = ID_DIGITS)
}

/// Parse the numeric suffix of a `K-<digits>` ID.
///
/// Returns `None` for anything that does not follow the pattern, so foreign
/// IDs never take part in sequence allocation.
pub fn parse_id(id: &str) -> Option<u64> {
    let digits = id.strip_prefix(ID_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// The ID following the highest conforming ID in `ids`.
///
/// An empty input yields `K-000001`. Fails if the highest ID has no
/// successor.
pub fn next_id<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<String> {
    let max = ids.into_iter().filter_map(parse_id).max().unwrap_or(0);
    let next = max.checked_add(1).ok_or_else(|| {
        Error::Validation(format!(
            "atom id sequence exhausted at {}",
            format_id(max)
        ))
    })?;
    Ok(format_id(next))
}

/// True if `id` is a conforming ID whose number cannot be incremented.
pub fn is_last_id(id: &str) -> bool {
    parse_id(id) == Some(u64::MAX)
}

/// True if `name` looks like a stored atom file name (`K-...`).
pub fn has_id_prefix(name: &str) -> bool {
    name.starts_with(ID_PREFIX)
}

/// True if `id` can name an atom file: the `K-` prefix followed by ASCII
/// letters, digits, `-` or `_`.
///
/// Caller-chosen IDs need not be numeric, but they must stay inside the
/// atoms directory and be visible to listing.
pub fn is_storable_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}
