use std::time::{SystemTime, UNIX_EPOCH};

/// Generates a random 6-character token to use as a globally unique name or
/// value.
pub fn random_token() -> String {
    use rand::Rng;

    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// Turns the given test function path into a key prefix unique to this run,
/// so that concurrent tests sharing one exchange never see each other's
/// messages.
pub fn unique_prefix(path: &str) -> String {
    let stem = path
        .rsplit("::")
        .next()
        .unwrap_or(path)
        .replace(|c: char| !c.is_ascii_alphanumeric(), "_");

    format!(
        "{}_{}_{}.",
        stem,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        random_token(),
    )
}
