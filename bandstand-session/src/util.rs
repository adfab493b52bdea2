use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Generates a short random alphanumeric string, used for room ids and
/// public identities.
pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Trims a string and truncates it to at most `max_chars` characters.
pub fn sanitize_string(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}
