//! Free-text to canonical category inference.
//!
//! Resolution is table driven: an exact synonym lookup on the normalized input,
//! then a substring scan over each category's root tokens in priority order.
//! Both tables are plain data so they can be tested in isolation.

use std::fmt;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalCategory {
    Design,
    Developpement,
    Marketing,
    Business,
}

impl CanonicalCategory {
    /// The canonical name as stored in the `categories` table.
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalCategory::Design => "Design",
            CanonicalCategory::Developpement => "Développement",
            CanonicalCategory::Marketing => "Marketing",
            CanonicalCategory::Business => "Business",
        }
    }
}

impl fmt::Display for CanonicalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exact matches, keyed on normalized (lowercase, accent-free) text.
const SYNONYMS: &[(&str, CanonicalCategory)] = &[
    ("design", CanonicalCategory::Design),
    ("developpement", CanonicalCategory::Developpement),
    ("developement", CanonicalCategory::Developpement),
    ("dev", CanonicalCategory::Developpement),
    ("developpement web", CanonicalCategory::Developpement),
    ("marketing", CanonicalCategory::Marketing),
    ("marketing digital", CanonicalCategory::Marketing),
    ("business", CanonicalCategory::Business),
    ("entrepreneuriat", CanonicalCategory::Business),
];

/// Substring roots, scanned in this order; first hit wins.
const ROOTS: &[(CanonicalCategory, &[&str])] = &[
    (CanonicalCategory::Design, &["design"]),
    (CanonicalCategory::Developpement, &["dev"]),
    (CanonicalCategory::Marketing, &["marketing"]),
    (CanonicalCategory::Business, &["entrepren", "business"]),
];

/// Letters that do not decompose but still read as two base letters.
const LIGATURES: &[(char, &str)] = &[('œ', "oe"), ('æ', "ae"), ('ß', "ss")];

/// Trim, lowercase, strip accents and collapse inner whitespace.
///
/// Works on both precomposed and decomposed input: text is NFD-decomposed and
/// combining marks dropped before lowercasing.
pub fn normalize(input: &str) -> String {
    let mut folded = String::with_capacity(input.len());
    for c in input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
    {
        match LIGATURES.iter().find(|(lig, _)| *lig == c) {
            Some((_, base)) => folded.push_str(base),
            None => folded.push(c),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps free text to a canonical category, or `None` when the text should be
/// treated as a plain search. Total and side-effect free.
pub fn resolve(free_text: &str) -> Option<CanonicalCategory> {
    let q = normalize(free_text);
    if q.is_empty() {
        return None;
    }
    if let Some((_, cat)) = SYNONYMS.iter().find(|(key, _)| *key == q) {
        return Some(*cat);
    }
    ROOTS
        .iter()
        .find(|(_, roots)| roots.iter().any(|r| q.contains(r)))
        .map(|(cat, _)| *cat)
}
