//! Chat-name prompt construction and cleanup of model output.

use crate::summarize::build_conversation_text;
use crate::traits::ChatNameRequest;

/// The naming prompt: earlier context when the chat already has some, then
/// the latest query.
pub fn build_chat_name_prompt(req: &ChatNameRequest) -> String {
    let mut prompt = format!(
        "Give this conversation a short title of at most {words} words and \
         {chars} characters. Reply with the title only, no quotes or trailing \
         punctuation.\n\n",
        words = req.max_words,
        chars = req.max_length,
    );
    if let Some(summary) = req.previous_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("SUMMARY SO FAR:\n{summary}\n\n"));
    }
    if !req.conversation.is_empty() {
        prompt.push_str(&format!(
            "RECENT CONVERSATION:\n{}\n",
            build_conversation_text(&req.conversation)
        ));
    }
    prompt.push_str(&format!("LATEST MESSAGE:\n{}", req.query));
    prompt
}

/// Normalize a raw title: first non-empty line, surrounding quotes and
/// trailing punctuation stripped, clipped to `max_words` words and
/// `max_length` characters. `None` when nothing usable is left.
pub fn clean_chat_name(raw: &str, max_words: usize, max_length: usize) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches(|c: char| c == '#' || c.is_whitespace())
        .trim_start_matches("Title:")
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*') || c.is_whitespace());

    let words: Vec<&str> = line.split_whitespace().take(max_words.max(1)).collect();
    let mut name: String = words.join(" ").chars().take(max_length.max(1)).collect();
    name = name
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_owned();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
