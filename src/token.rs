/// Split `text` into tokens.
///
/// A token is a run of non-whitespace characters followed by any whitespace
/// that trails it. Whitespace in front of the first run is kept as a prefix
/// of the first token and a text made only of whitespace is a single token,
/// so concatenating the result always gives back `text`.
///
/// # Examples
///
/// ```
/// use stream_lab::token::tokenize;
///
/// assert_eq!(tokenize("the quick  fox"), vec!["the ", "quick  ", "fox"]);
/// assert!(tokenize("").is_empty());
/// ```
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = true;
    let mut seen_word = false;
    for (idx, ch) in text.char_indices() {
        let space = ch.is_whitespace();
        if !space && in_space {
            if seen_word {
                tokens.push(&text[start..idx]);
                start = idx;
            }
            seen_word = true;
        }
        in_space = space;
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Concatenate consecutive groups of `chunk_size` tokens.
///
/// The last group holds the remainder when the token count is not a multiple
/// of `chunk_size`. `chunk_size` must be at least one.
pub fn group<'a>(tokens: &'a [&'a str], chunk_size: usize) -> impl Iterator<Item = String> + 'a {
    tokens.chunks(chunk_size).map(|chunk| chunk.concat())
}
