//! Post-processing of model output before it goes back to Telegram.

/// Telegram rejects messages over 4096 chars; leave headroom.
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Section labels and their emoji. Order matters: first match wins.
const HEADERS: [(&str, &str); 10] = [
    ("Key Features", "🔑"),
    ("How it Works", "⚙️"),
    ("Benefits", "✨"),
    ("Applications", "🚀"),
    ("Example", "📝"),
    ("Summary", "📌"),
    ("Steps", "📋"),
    ("Important", "❗"),
    ("Note", "📢"),
    ("Tips", "💡"),
];

/// Prefix recognised section headers with their emoji.
///
/// Every line is trimmed and blank lines are dropped. A line counts as a
/// header when it starts with `"<Label>:"`, compared case-insensitively.
pub fn add_emojis(text: &str) -> String {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let lower = line.to_lowercase();
            match HEADERS
                .iter()
                .find(|(label, _)| lower.starts_with(&format!("{}:", label.to_lowercase())))
            {
                Some((_, emoji)) => format!("{emoji} {line}"),
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split text into fixed-size slices of at most [`MAX_CHUNK_CHARS`] chars.
///
/// No word-boundary awareness. Concatenating the result yields the input.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_CHUNK_CHARS {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(MAX_CHUNK_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
