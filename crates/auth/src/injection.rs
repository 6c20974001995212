//! Injection scanning over decoded token content (layer 10).

use regex::Regex;

/// Scans decoded header and payload text against a configured pattern list.
///
/// The default list covers the usual suspects: SQL keywords and comment
/// markers, script/XSS vectors, and LDAP filter metacharacters. Patterns are
/// applied to the decoded JSON text, so encoding tricks in the raw token do
/// not help an attacker.
#[derive(Debug, Clone)]
pub struct InjectionScanner {
    patterns: Vec<Regex>,
}

const DEFAULT_PATTERNS: &[&str] = &[
    // SQL-ish
    r"(?i)\bunion\b\s+\bselect\b",
    r"(?i)\bdrop\b\s+\btable\b",
    r"(?i)\bdelete\b\s+\bfrom\b",
    r"(?i)\binsert\b\s+\binto\b",
    r"(?i)\bor\b\s+1\s*=\s*1",
    r"'\s*--",
    r";\s*--",
    // script-ish / XSS-ish
    r"(?i)<\s*script",
    r"(?i)javascript\s*:",
    r"(?i)\bon(?:error|load|click|mouseover)\s*=",
    r"(?i)\beval\s*\(",
    // LDAP-ish filter injection
    r"\)\s*\(\|",
    r"\)\s*\(&",
    r"\*\)\s*\(",
];

impl InjectionScanner {
    /// Scanner with the default pattern list.
    pub fn with_defaults() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("default injection pattern must compile"))
            .collect();
        Self { patterns }
    }

    /// Scanner with a custom pattern list.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// First pattern that matches `text`, if any.
    pub fn scan(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.is_match(text))
            .map(|pattern| pattern.as_str())
    }
}

impl Default for InjectionScanner {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_json_passes() {
        let scanner = InjectionScanner::with_defaults();
        let text = r#"{"sub":"4f9d","tenant_id":"11111111-1111-1111-1111-111111111111","roles":["operator"]}"#;
        assert_eq!(scanner.scan(text), None);
    }

    #[test]
    fn sql_keywords_are_caught() {
        let scanner = InjectionScanner::with_defaults();
        assert!(scanner.scan(r#"{"name":"x UNION SELECT password"}"#).is_some());
        assert!(scanner.scan(r#"{"name":"1 OR 1=1"}"#).is_some());
        assert!(scanner.scan(r#"{"name":"drop table events"}"#).is_some());
    }

    #[test]
    fn script_vectors_are_caught() {
        let scanner = InjectionScanner::with_defaults();
        assert!(scanner.scan(r#"{"name":"<script>alert(1)</script>"}"#).is_some());
        assert!(scanner.scan(r#"{"url":"javascript:void(0)"}"#).is_some());
        assert!(scanner.scan(r#"{"x":"<img onerror=steal()>"}"#).is_some());
    }

    #[test]
    fn ldap_filters_are_caught() {
        let scanner = InjectionScanner::with_defaults();
        assert!(scanner.scan(r#"{"cn":"admin)(|(uid=*"}"#).is_some());
    }

    #[test]
    fn hyphenated_uuids_do_not_false_positive() {
        let scanner = InjectionScanner::with_defaults();
        assert_eq!(
            scanner.scan(r#"{"jti":"0195cb1e-9b7a-7e70-8a40-1d6b2f1f3a11"}"#),
            None
        );
    }
}
