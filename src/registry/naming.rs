//! Entity naming and generated secrets

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Highest trailing `-N` index among `names`
///
/// A name whose last `-` segment is not a number counts as 0, so the
/// sequence never goes backwards and never reuses an index.
pub fn last_index<'a>(names: impl IntoIterator<Item = &'a str>) -> u64 {
    names
        .into_iter()
        .map(|name| {
            name.rsplit('-')
                .next()
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
        })
        .max()
        .unwrap_or(0)
}

/// Random alphanumeric string of length `len`
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
