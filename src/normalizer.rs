//! Gift-name normalization: maps marketplace-specific display strings to
//! the canonical catalog slug used everywhere else in the pipeline.

use std::collections::HashMap;
use tracing::warn;

/// Manual overrides applied after the strip/collapse pipeline, for names
/// that don't reduce to their canonical slug mechanically.
fn overrides() -> &'static HashMap<&'static str, &'static str> {
    static OVERRIDES: std::sync::OnceLock<HashMap<&'static str, &'static str>> = std::sync::OnceLock::new();
    OVERRIDES.get_or_init(|| {
        HashMap::from([
            ("bluestardeluxe", "bluestar"),
            ("redballoonnft", "redballoon"),
            ("greenclovernftgift", "greenclover"),
        ])
    })
}

/// `normalize("Plush Pepe NFT #123")` → `"plushpepe"`.
///
/// Pipeline: lowercase, strip the `nft`/`gift`/`telegram` noise words and
/// any `#123`/`(123)` suffix, strip remaining non-alphanumerics, collapse
/// whitespace to empty, then apply the manual override table.
pub fn normalize(raw: &str) -> String {
    let lower = raw.to_lowercase();

    let mut stripped = lower;
    for pat in ["nft", "gift", "telegram"] {
        stripped = strip_word(&stripped, pat);
    }
    stripped = strip_numbered_suffix(&stripped);

    let cleaned: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join("");

    let result = overrides().get(collapsed.as_str()).map(|s| s.to_string()).unwrap_or(collapsed);

    if result.is_empty() {
        warn!(input = raw, "normalize() produced an empty slug");
    }
    result
}

fn strip_word(s: &str, word: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find(word) {
        let before_ok = idx == 0 || !rest.as_bytes()[idx - 1].is_ascii_alphanumeric();
        let after_idx = idx + word.len();
        let after_ok = after_idx >= rest.len() || !rest.as_bytes()[after_idx].is_ascii_alphanumeric();
        if before_ok && after_ok {
            out.push_str(&rest[..idx]);
            out.push(' ');
            rest = &rest[after_idx..];
        } else {
            out.push_str(&rest[..idx + word.len()]);
            rest = &rest[idx + word.len()..];
        }
    }
    out.push_str(rest);
    out
}

fn strip_numbered_suffix(s: &str) -> String {
    // Drop "#123" and "(123)" style serial suffixes — these identify an
    // individual NFT, not the gift collection.
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '#' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                out.push(' ');
                i = j;
                continue;
            }
        }
        if chars[i] == '(' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() && chars[j] == ')' {
                out.push(' ');
                i = j + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_noise_words_and_serial() {
        assert_eq!(normalize("Toy Bear NFT #123"), "toybear");
    }

    #[test]
    fn strips_parenthesized_serial() {
        assert_eq!(normalize("Jester Hat Gift (42)"), "jesterhat");
    }

    #[test]
    fn collapses_whitespace_and_punctuation() {
        assert_eq!(normalize("  Some   Gift!!  "), "some");
    }

    #[test]
    fn applies_manual_override_table() {
        assert_eq!(normalize("BlueStarDeluxe"), "bluestar");
        assert_eq!(normalize("RedBalloonNFT"), "redballoon");
        assert_eq!(normalize("GreenCloverNFTGift"), "greenclover");
    }

    #[test]
    fn idempotent_on_already_normalized_slugs() {
        let once = normalize("Durov's Cap");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn idempotence_property_over_many_inputs() {
        for raw in [
            "Plush Pepe NFT #7",
            "Telegram Gift: Santa Hat (10)",
            "XMAS-TREE",
            "durov's cap",
        ] {
            let once = normalize(raw);
            let twice = normalize(&once);
            assert_eq!(once, twice, "normalize not idempotent for {raw:?}");
        }
    }
}
