use std::fmt;

/// Characters that would turn the middle of a pattern back into a real regex
const REGEX_SPECIAL: &str = "\\^$.?*|+()[]{}";

/// Case-insensitive substring test compiled from one of the three `(?is)` forms
/// accepted by the `~=` operator:
///
/// - `(?is)prefix.*`
/// - `(?is).*infix.*`
/// - `(?is).*suffix`
///
/// There is no general regex engine behind this; anything else is rejected at parse time.
#[derive(Clone, PartialEq, Eq)]
pub enum Pattern {
    Prefix(String),
    Contains(String),
    Suffix(String),
}

impl Pattern {
    /// Compile a pattern source, returning `None` when it is not one of the restricted forms
    pub fn compile(source: &str) -> Option<Self> {
        if let Some(v) = literal_between(source, "(?is)", ".*") {
            return Some(Pattern::Prefix(v.to_lowercase()));
        }
        if let Some(v) = literal_between(source, "(?is).*", ".*") {
            return Some(Pattern::Contains(v.to_lowercase()));
        }
        if let Some(v) = literal_between(source, "(?is).*", "") {
            return Some(Pattern::Suffix(v.to_lowercase()));
        }
        None
    }

    pub fn is_match(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        match self {
            Pattern::Prefix(p) => text.starts_with(p.as_str()),
            Pattern::Contains(p) => text.contains(p.as_str()),
            Pattern::Suffix(p) => text.ends_with(p.as_str()),
        }
    }
}

fn literal_between<'a>(source: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let rest = source.strip_prefix(prefix)?;
    let middle = rest.strip_suffix(suffix)?;
    if middle.chars().any(|c| REGEX_SPECIAL.contains(c)) {
        return None;
    }
    Some(middle)
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Prefix(p) => write!(f, "Prefix({:?})", p),
            Pattern::Contains(p) => write!(f, "Contains({:?})", p),
            Pattern::Suffix(p) => write!(f, "Suffix({:?})", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_forms() {
        assert_eq!(
            Pattern::compile("(?is)skip.*"),
            Some(Pattern::Prefix("skip".to_string()))
        );
        assert_eq!(
            Pattern::compile("(?is).*跳过.*"),
            Some(Pattern::Contains("跳过".to_string()))
        );
        assert_eq!(
            Pattern::compile("(?is).*Close"),
            Some(Pattern::Suffix("close".to_string()))
        );
    }

    #[test]
    fn test_general_regex_rejected() {
        assert_eq!(Pattern::compile("skip.*"), None);
        assert_eq!(Pattern::compile("(?is)a|b.*"), None);
        assert_eq!(Pattern::compile("(?is).*[0-9]+.*"), None);
        assert_eq!(Pattern::compile("(?i).*x"), None);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let p = Pattern::compile("(?is)skip.*").unwrap();
        assert!(p.is_match("SKIP 5s"));
        assert!(!p.is_match("please skip"));

        let p = Pattern::compile("(?is).*AD.*").unwrap();
        assert!(p.is_match("close ad now"));

        let p = Pattern::compile("(?is).*s").unwrap();
        assert!(p.is_match("5S"));
        assert!(!p.is_match("5s left"));
    }

    #[test]
    fn test_empty_middle_matches_everything() {
        let p = Pattern::compile("(?is).*").unwrap();
        assert!(p.is_match(""));
        assert!(p.is_match("anything"));
    }
}
