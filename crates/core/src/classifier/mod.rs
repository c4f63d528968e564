pub mod keyword;
pub mod router;

/// Lowercases and collapses runs of whitespace, the canonical form every
/// classifier input goes through.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::normalize_text;

    #[test]
    fn normalization_lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_text("  Cancel\tMY   Flight \n"), "cancel my flight");
    }

    #[test]
    fn normalization_of_empty_input_is_empty() {
        assert_eq!(normalize_text("   \n\t"), "");
    }
}
