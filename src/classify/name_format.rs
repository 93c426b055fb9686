//! Personal-name format heuristics.

use std::sync::OnceLock;

use regex::Regex;

// "Epstein, Jeffrey" / "Band, Doug J."
static SURNAME_GIVEN: OnceLock<Regex> = OnceLock::new();
// "Doug Band" / "Jeffrey E. Epstein" / "Ghislaine Noelle Marion Maxwell"
static GIVEN_SURNAME: OnceLock<Regex> = OnceLock::new();

fn surname_given() -> &'static Regex {
    SURNAME_GIVEN.get_or_init(|| {
        Regex::new(
            r"^\p{L}[\p{L}'\-]*(?:\s+\p{L}[\p{L}'\-]*)?\s*,\s*\p{L}[\p{L}'\-]*\.?(?:\s+\p{L}[\p{L}'\-]*\.?){0,2}$",
        )
        .expect("surname-given pattern is valid")
    })
}

fn given_surname() -> &'static Regex {
    GIVEN_SURNAME.get_or_init(|| {
        Regex::new(r"^\p{Lu}[\p{L}'\-]*\.?(?:\s+\p{Lu}[\p{L}'\-]*\.?){1,3}$")
            .expect("given-surname pattern is valid")
    })
}

/// Returns true if `name` has the shape of a personal name.
///
/// Accepts `Surname, Given` (any case) and two to four capitalised words.
/// A run of single-letter initials with nothing else is rejected, as is
/// anything containing digits.
#[must_use]
pub fn looks_like_personal_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || name.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    let has_real_word = name
        .split(|c: char| c.is_whitespace() || c == ',')
        .any(|w| w.trim_end_matches('.').chars().filter(|c| c.is_alphabetic()).count() >= 2);
    if !has_real_word {
        return false;
    }
    surname_given().is_match(name) || given_surname().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_personal_formats() {
        for name in [
            "Epstein, Jeffrey",
            "Doug Band",
            "DOUG BAND",
            "band, doug",
            "Jeffrey E. Epstein",
            "Maxwell, Ghislaine N.",
            "Jean-Luc Brunel",
            "Conor O'Brien",
        ] {
            assert!(looks_like_personal_name(name), "{name}");
        }
    }

    #[test]
    fn rejects_non_name_shapes() {
        for name in ["FBI", "Zorro", "doug band", "A. B.", "Flight 727", "One Two Three Four Five", ""] {
            assert!(!looks_like_personal_name(name), "{name}");
        }
    }
}
