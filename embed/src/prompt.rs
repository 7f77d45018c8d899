/// Instruction prefix the BGE model family was trained with for
/// retrieval queries. Raw text is always wrapped before encoding.
pub const RETRIEVAL_PREFIX: &str = "Represent this sentence for searching relevant passages: ";

/// Wraps a raw input in the retrieval prompt.
pub(crate) fn wrap(text: &str) -> String {
    format!("{RETRIEVAL_PREFIX}{text}")
}

/// Wraps every input in the retrieval prompt, preserving order.
pub(crate) fn wrap_all(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| wrap(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_prepends_prefix() {
        let wrapped = wrap("how do beehives work");
        assert!(wrapped.starts_with(RETRIEVAL_PREFIX));
        assert!(wrapped.ends_with("how do beehives work"));
    }

    #[test]
    fn wrap_all_preserves_order() {
        let wrapped = wrap_all(&["first", "second"]);
        assert_eq!(
            wrapped,
            vec![
                format!("{RETRIEVAL_PREFIX}first"),
                format!("{RETRIEVAL_PREFIX}second"),
            ]
        );
    }
}
