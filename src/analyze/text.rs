// src/analyze/text.rs
//! Builds the bounded text sent to the classifiers.

use sha2::{Digest, Sha256};

/// Hard cap on characters sent to a classifier (truncated, never rejected).
pub const MAX_TEXT_CHARS: usize = 512;
/// Below this many characters there is too little signal to classify.
pub const MIN_TEXT_CHARS: usize = 10;
/// Bodies this short are ignored and the title is used alone.
pub const MIN_BODY_CHARS: usize = 20;

/// `"{title}. {body}"` when the body carries content, else the title.
/// Returns `None` when the result is too short to classify.
pub fn build_text(title: &str, body: &str) -> Option<String> {
    let title = title.trim();
    let body = body.trim();
    let joined = if body.chars().count() > MIN_BODY_CHARS {
        format!("{title}. {body}")
    } else {
        title.to_string()
    };

    let bounded: String = joined.chars().take(MAX_TEXT_CHARS).collect();
    if bounded.trim().chars().count() < MIN_TEXT_CHARS {
        return None;
    }
    Some(bounded)
}

/// Short stable id for a text, safe to log instead of the text itself.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_body_is_ignored() {
        let t = build_text("Senate passes the budget bill", "see link").unwrap();
        assert_eq!(t, "Senate passes the budget bill");
    }

    #[test]
    fn long_body_is_appended() {
        let body = "The measure now heads to the president for signature.";
        let t = build_text("Senate passes bill", body).unwrap();
        assert_eq!(t, format!("Senate passes bill. {body}"));
    }

    #[test]
    fn overlong_text_is_truncated_not_rejected() {
        let title = "x".repeat(2_000);
        let t = build_text(&title, "").unwrap();
        assert_eq!(t.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let title = "é".repeat(600);
        let t = build_text(&title, "").unwrap();
        assert_eq!(t.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn too_short_text_is_rejected() {
        assert!(build_text("Hi", "").is_none());
        assert!(build_text("   ", "short").is_none());
        assert!(build_text("exactly10!", "").is_some());
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint("hello world");
        assert_eq!(a.len(), 12);
        assert_eq!(a, fingerprint("hello world"));
        assert_ne!(a, fingerprint("hello world!"));
    }
}
