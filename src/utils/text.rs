//! Text normalization and content-identity helpers.
//!
//! Every entry flowing through the pipeline is keyed and matched on a
//! normalized view of its text: lowercased, diacritics folded, whitespace
//! collapsed. The identity hashes (SHA-1 for the cross-source uuid, MD5 for
//! the database dedup index) are both derived from the raw `title|link` key,
//! so two sources publishing the same article agree on both.

use md5::Md5;
use sha1::{Digest, Sha1};
use unicode_normalization::UnicodeNormalization;

/// Builds the normalized text blob used for keyword matching.
///
/// Concatenates title and summary, lowercases, folds diacritics and
/// collapses runs of whitespace into single spaces.
pub fn text_blob(title: &str, summary: &str) -> String {
    let joined = format!("{} {}", title, summary);
    normalize(&joined)
}

/// Normalizes a string for matching: lowercase, diacritics folded,
/// whitespace collapsed.
pub fn normalize(text: &str) -> String {
    let folded = fold_diacritics(text);
    let lowered = folded.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = true;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Collapses whitespace runs without changing case or characters.
///
/// Used for display text (summaries) where the original casing matters.
pub fn normalize_preserving_case(textual: &str) -> String {
    let mut out = String::with_capacity(textual.len());
    let mut last_was_space = true;
    for c in textual.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Strips combining marks after NFKD decomposition ("Bogotá" -> "Bogota").
pub fn fold_diacritics(text: &str) -> String {
    text.nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

/// Splits a normalized blob into word tokens.
///
/// Tokens are maximal runs of alphanumeric characters; punctuation is a
/// separator. Operates on already-normalized text.
pub fn tokenize(blob: &str) -> Vec<&str> {
    blob.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// The cross-source identity key for an entry.
///
/// Identical `(title, link)` pairs produce the same key regardless of which
/// feed delivered them.
pub fn identity_key(title: &str, link: &str) -> String {
    format!("{}|{}", title, link)
}

/// SHA-1 hex digest of the identity key; used as the entry/alert uuid.
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// MD5 hex digest of the identity key; used for the content-hash dedup index.
pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_collapses_whitespace() {
        assert_eq!(normalize("  Bombing   IN  Downtown\t"), "bombing in downtown");
    }

    #[test]
    fn test_normalize_folds_diacritics() {
        assert_eq!(normalize("Bogotá São Paulo Münster"), "bogota sao paulo munster");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_text_blob_joins_title_and_summary() {
        let blob = text_blob("Explosion Reported", "Casualties expected.");
        assert_eq!(blob, "explosion reported casualties expected.");
    }

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        let blob = "attack near kabul, 12 dead";
        assert_eq!(tokenize(blob), vec!["attack", "near", "kabul", "12", "dead"]);
    }

    #[test]
    fn test_identity_key_format() {
        assert_eq!(identity_key("Title", "https://x/y"), "Title|https://x/y");
    }

    #[test]
    fn test_sha1_is_deterministic_across_calls() {
        let a = sha1_hex("Bombing in downtown kills 12|https://x/y");
        let b = sha1_hex("Bombing in downtown kills 12|https://x/y");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_md5_is_deterministic_and_distinct_from_sha1() {
        let key = "Some Title|https://example.com/a";
        let md5 = md5_hex(key);
        assert_eq!(md5.len(), 32);
        assert_ne!(md5, sha1_hex(key));
    }

    #[test]
    fn test_trailing_ellipsis_changes_identity() {
        // Same link, truncated title: these are distinct identities.
        let a = sha1_hex(&identity_key("Full headline text", "https://x/y"));
        let b = sha1_hex(&identity_key("Full headline te…", "https://x/y"));
        assert_ne!(a, b);
    }
}
