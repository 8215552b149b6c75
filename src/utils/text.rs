//! Transcript formatting helpers.
//!
//! Recognizer transcripts arrive as space-separated tokens, with punctuation
//! as separate tokens and occasional `<...>` markup such as `<unk>`.

use regex::Regex;
use std::sync::LazyLock;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]+>").expect("markup pattern is valid"));

const WHITESPACE: [char; 3] = [' ', '\n', '\t'];

/// Tokens glued to the previous token.
const PUNCTUATION: [char; 8] = [',', ':', ';', '.', '!', '?', '-', ')'];

/// Tokens after which the next word starts a sentence.
const SENTENCE_END: [char; 4] = ['.', '!', '?', ')'];

/// Remove `<...>` markup tokens.
pub fn strip_markup(transcript: &str) -> String {
    MARKUP.replace_all(transcript, "").into_owned()
}

/// Format a raw transcript for display.
///
/// Strips markup, glues punctuation to the preceding word and capitalises
/// the word following a sentence-ending token.
///
/// ```
/// use asr_stream::utils::pretty_print;
///
/// assert_eq!(pretty_print("labdien , kā iet ? labi <unk> ."), "labdien, kā iet? Labi.");
/// ```
pub fn pretty_print(transcript: &str) -> String {
    let stripped = strip_markup(transcript);

    let mut text = String::with_capacity(stripped.len());
    let mut sentence_start = false;
    let mut whitespace_before = false;

    for token in stripped.split(' ').filter(|t| !t.is_empty()) {
        let mut chars = token.chars();
        let Some(first) = chars.next() else {
            continue;
        };

        let glued =
            whitespace_before || WHITESPACE.contains(&first) || PUNCTUATION.contains(&first);
        if !text.is_empty() && !glued {
            text.push(' ');
        }

        if sentence_start {
            text.extend(first.to_uppercase());
            text.push_str(chars.as_str());
        } else {
            text.push_str(token);
        }

        whitespace_before = WHITESPACE.contains(&first);
        if token.chars().count() > 1 {
            sentence_start = false;
        } else if SENTENCE_END.contains(&first) {
            sentence_start = true;
        } else if !whitespace_before {
            sentence_start = false;
        }
    }

    text
}
