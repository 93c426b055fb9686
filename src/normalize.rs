//! Name normalization.
//!
//! Produces the comparison key that identity resolution hashes. The key is
//! never shown to users; display uses the entity's canonical name.
//!
//! Normalization is pure, total and idempotent:
//! `normalize(&normalize(x)) == normalize(x)` for every input.

/// Honorifics and generational suffixes removed as whole tokens.
const HONORIFICS: &[&str] = &["mr", "mrs", "ms", "mx", "dr", "prof", "jr", "sr"];

fn is_honorific(token: &str) -> bool {
    HONORIFICS.contains(&token)
}

/// Normalize a raw name into its comparison key.
///
/// Steps: trim, lowercase, drop periods, turn other punctuation into
/// separators (hyphens and apostrophes survive), remove honorific tokens,
/// and collapse whitespace. Typographic apostrophes and dashes fold to their
/// ASCII forms.
///
/// # Examples
///
/// ```
/// use entity_registry::normalize::normalize;
///
/// assert_eq!(normalize("  Dr. Jeffrey   EPSTEIN, Jr. "), "jeffrey epstein");
/// assert_eq!(normalize("O\u{2019}Brien-Smith"), "o'brien-smith");
/// ```
#[must_use]
pub fn normalize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();

    let mut cleaned = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' | '`' => cleaned.push('\''),
            '\u{2010}'..='\u{2015}' => cleaned.push('-'),
            '.' => {}
            c if c.is_alphanumeric() || c == '-' || c == '\'' => cleaned.push(c),
            _ => cleaned.push(' '),
        }
    }

    cleaned
        .split_whitespace()
        .filter(|token| !is_honorific(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns true if a normalized key is usable as an identity anchor.
///
/// A key must contain at least one alphanumeric character; keys made only of
/// hyphens and apostrophes are rejected.
#[must_use]
pub fn is_usable_key(normalized: &str) -> bool {
    normalized.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_lowercases_and_collapses() {
        assert_eq!(normalize("  Jeffrey\t\tEpstein \n"), "jeffrey epstein");
    }

    #[test]
    fn strips_honorifics_and_suffixes() {
        assert_eq!(normalize("Mr. Doug Band"), "doug band");
        assert_eq!(normalize("Dr Jane Doe"), "jane doe");
        assert_eq!(normalize("John Smith Sr."), "john smith");
        assert_eq!(normalize("Band, Douglas Jr."), "band douglas");
    }

    #[test]
    fn honorific_must_be_whole_token() {
        assert_eq!(normalize("Drake"), "drake");
        assert_eq!(normalize("Mrsa Labs"), "mrsa labs");
    }

    #[test]
    fn keeps_hyphens_and_apostrophes() {
        assert_eq!(normalize("Jean-Luc O'Neil"), "jean-luc o'neil");
        assert_eq!(normalize("O\u{2019}Neil"), "o'neil");
    }

    #[test]
    fn punctuation_becomes_separator() {
        assert_eq!(normalize("Epstein,Jeffrey"), "epstein jeffrey");
        assert_eq!(normalize("Little St. James Island"), "little st james island");
        assert_eq!(normalize("Smith & Wesson (Holdings)"), "smith wesson holdings");
    }

    #[test]
    fn only_honorifics_normalizes_to_empty() {
        assert_eq!(normalize("Mr."), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn idempotent_on_tricky_inputs() {
        for raw in ["M.R. Smith", "D.R.", "  A -- B  ", "\u{130}stanbul Ltd.", "J.-P. Dupont"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn usable_key_requires_alphanumeric() {
        assert!(is_usable_key("a"));
        assert!(!is_usable_key("-'-"));
        assert!(!is_usable_key(""));
    }
}
