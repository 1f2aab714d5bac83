//! Case-insensitive name identity.
//!
//! Two names are the same child if they are equal after ASCII lowercasing.
//! This is the same identity SQLite's `COLLATE NOCASE` gives the state
//! tables, so non-ASCII letters compare by exact code point on both sides.
//! Children sort by the folded form, ties broken ordinally, so listings are
//! stable and match what enumeration continuation expects.

use std::cmp::Ordering;

fn folded(name: &str) -> impl Iterator<Item = u8> + '_ {
    name.bytes().map(|b| b.to_ascii_lowercase())
}

/// Lowercase form used as an identity key.
pub fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Fold `name` into a reusable buffer.
pub fn fold_into(name: &str, out: &mut String) {
    out.clear();
    out.push_str(name);
    out.make_ascii_lowercase();
}

pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Sort order for children of one folder.
pub fn name_cmp(a: &str, b: &str) -> Ordering {
    name_cmp_folded(a, b).then_with(|| a.cmp(b))
}

/// Case-insensitive order that treats names equal when they fold the same.
pub fn name_cmp_folded(a: &str, b: &str) -> Ordering {
    folded(a).cmp(folded(b))
}

/// Case-insensitive `*`/`?` wildcard match, used by enumeration filters.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let name: Vec<char> = name.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = n;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            n = mark;
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_equal_ignores_case() {
        assert!(names_equal("ReadMe.md", "README.MD"));
        assert!(!names_equal("a", "b"));
    }

    #[test]
    fn test_non_ascii_letters_keep_their_case() {
        assert!(names_equal("Ünïcode.txt", "ÜNÏCODE.TXT"));
        assert!(!names_equal("Ünïcode.txt", "üNÏCODE.TXT"));
        assert_eq!(fold("ÜnÏ.TXT"), "ÜnÏ.txt");
        assert_ne!(name_cmp_folded("é", "É"), Ordering::Equal);
    }

    #[test]
    fn test_sort_is_case_insensitive_then_ordinal() {
        let mut names = vec!["b.txt", "B", "a", "A.txt", "C"];
        names.sort_by(|a, b| name_cmp(a, b));
        assert_eq!(names, ["a", "A.txt", "B", "b.txt", "C"]);
    }

    #[rstest]
    #[case("*", "anything", true)]
    #[case("*.rs", "lib.RS", true)]
    #[case("*.rs", "lib.rsx", false)]
    #[case("?.txt", "a.txt", true)]
    #[case("?.txt", "ab.txt", false)]
    #[case("a*b*c", "aXXbYYc", true)]
    #[case("a*b*c", "aXXbYY", false)]
    #[case("", "", true)]
    #[case("", "x", false)]
    fn test_wildcard(#[case] pattern: &str, #[case] name: &str, #[case] matches: bool) {
        assert_eq!(wildcard_match(pattern, name), matches);
    }
}
