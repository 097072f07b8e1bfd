pub const MAX_USERNAME_LENGTH: usize = 20;

/// Collapses interior whitespace and caps the length. Returns `None` when
/// nothing usable remains; usernames are identity, so there is no fallback.
pub fn sanitize_username(name: &str) -> Option<String> {
    let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.chars().take(MAX_USERNAME_LENGTH).collect())
}
