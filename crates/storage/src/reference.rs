//! Document references.

use std::fmt;

/// Why a reference string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("document reference is empty")]
    Empty,

    #[error("malformed document reference '{reference}': {reason}")]
    Malformed { reference: String, reason: &'static str },
}

/// Identifies one stored document binary.
///
/// Immutable once parsed. The original string (trimmed) is kept so it can be
/// logged and shown back to the reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentReference {
    /// Absolute `http` or `https` URL, fetched directly.
    Url(String),

    /// Object path inside the storage bucket, without a leading slash.
    StoragePath(String),
}

impl DocumentReference {
    /// Parse a reference as stored on a magazine record.
    ///
    /// ```
    /// use flipbook_storage::DocumentReference;
    ///
    /// let reference = DocumentReference::parse("/magazines/issue-12.pdf").unwrap();
    /// assert_eq!(reference.as_str(), "magazines/issue-12.pdf");
    /// assert!(!reference.is_url());
    /// ```
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let malformed =
            |reason| ReferenceError::Malformed { reference: trimmed.to_string(), reason };

        if trimmed.chars().any(char::is_control) {
            return Err(malformed("contains control characters"));
        }

        if let Some(scheme) = scheme_of(trimmed) {
            if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
                return Err(malformed("only http and https URLs are supported"));
            }
            let authority = &trimmed[scheme.len() + "://".len()..];
            let host = authority.split(['/', '?', '#']).next().unwrap_or_default();
            if host.is_empty() {
                return Err(malformed("URL has no host"));
            }
            if trimmed.chars().any(char::is_whitespace) {
                return Err(malformed("URL contains whitespace"));
            }
            return Ok(DocumentReference::Url(trimmed.to_string()));
        }

        let path = trimmed.trim_start_matches('/');
        if path.is_empty() {
            return Err(malformed("no object path"));
        }
        if let Some((prefix, _)) = path.split_once(':') {
            if URL_SCHEMES.iter().any(|scheme| prefix.eq_ignore_ascii_case(scheme)) {
                return Err(malformed("URL is missing '//'"));
            }
        }
        if path.contains('\\') {
            return Err(malformed("backslashes are not allowed in storage paths"));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(malformed("parent segments are not allowed in storage paths"));
        }

        Ok(DocumentReference::StoragePath(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            DocumentReference::Url(url) => url,
            DocumentReference::StoragePath(path) => path,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, DocumentReference::Url(_))
    }

    /// Final path segment, used to name output files.
    pub fn file_name(&self) -> &str {
        let without_query = self.as_str().split(['?', '#']).next().unwrap_or_default();
        without_query.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or(without_query)
    }
}

impl fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Schemes that are never read as the first segment of a storage path.
const URL_SCHEMES: [&str; 5] = ["http", "https", "javascript", "data", "file"];

/// URI scheme of `input`, if it starts with `scheme://`.
fn scheme_of(input: &str) -> Option<&str> {
    let (candidate, rest) = input.split_once(':')?;
    if !rest.starts_with("//") {
        return None;
    }
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_references_are_rejected() {
        assert_eq!(DocumentReference::parse(""), Err(ReferenceError::Empty));
        assert_eq!(DocumentReference::parse("   \t"), Err(ReferenceError::Empty));
    }

    #[test]
    fn storage_paths_lose_leading_slashes() {
        let reference = DocumentReference::parse("//magazines/issue-12.pdf").unwrap();
        assert_eq!(reference, DocumentReference::StoragePath("magazines/issue-12.pdf".into()));
        assert_eq!(reference.file_name(), "issue-12.pdf");
    }

    #[test]
    fn http_urls_are_kept_verbatim() {
        let url = "https://cdn.example.com/magazines/issue-3.pdf?token=abc";
        let reference = DocumentReference::parse(url).unwrap();
        assert!(reference.is_url());
        assert_eq!(reference.as_str(), url);
        assert_eq!(reference.file_name(), "issue-3.pdf");
    }

    #[test]
    fn unsupported_schemes_are_malformed() {
        for input in ["ftp://example.com/a.pdf", "javascript:alert(1)", "data:application/pdf;base64,AA"] {
            assert!(
                matches!(DocumentReference::parse(input), Err(ReferenceError::Malformed { .. })),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn urls_need_a_host() {
        assert!(matches!(
            DocumentReference::parse("https:///magazines/a.pdf"),
            Err(ReferenceError::Malformed { reason: "URL has no host", .. })
        ));
        assert!(DocumentReference::parse("http:magazines/a.pdf").is_err());
    }

    #[test]
    fn traversal_and_backslashes_are_malformed() {
        assert!(DocumentReference::parse("magazines/../secrets.pdf").is_err());
        assert!(DocumentReference::parse("magazines\\issue.pdf").is_err());
        assert!(DocumentReference::parse("/").is_err());
        assert!(DocumentReference::parse("magazines/issue\u{0}.pdf").is_err());
    }

    #[test]
    fn colons_without_slashes_stay_storage_paths() {
        for input in ["march:2024.pdf", "issues/2024:spring.pdf", "v2:archive/issue-1.pdf"] {
            assert_eq!(
                DocumentReference::parse(input),
                Ok(DocumentReference::StoragePath(input.to_string())),
                "{input} should be a storage path"
            );
        }
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let reference: DocumentReference = "  magazines/issue-1.pdf\n".parse().unwrap();
        assert_eq!(reference.to_string(), "magazines/issue-1.pdf");
    }
}
