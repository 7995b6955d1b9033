use crate::error::{Error, Result};

/// Substrings that are never allowed in entity paths.
const INVALID_PATH_SUBSTRINGS: [&str; 3] = ["..", " ", ";"];

fn validate(path: &str) -> Result<()> {
    for item in INVALID_PATH_SUBSTRINGS {
        if path.contains(item) {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: format!("contains disallowed substring '{}'", item),
            });
        }
    }
    if path.chars().any(char::is_whitespace) {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "contains whitespace".to_string(),
        });
    }
    Ok(())
}

/// Normalizes a path: strips leading, trailing, and duplicate slashes and
/// lowercases every segment.
pub fn normalize(path: &str) -> Result<String> {
    validate(path)?;
    Ok(path
        .trim()
        .to_lowercase()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Normalizes a path whose last segment is case-sensitive. Geography paths
/// end in GEOIDs, which must keep their case.
pub fn normalize_case_sensitive(path: &str) -> Result<String> {
    validate(path)?;
    let segs: Vec<&str> = path
        .trim()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .collect();
    let last = segs.len().saturating_sub(1);
    Ok(segs
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            if i < last {
                seg.to_lowercase()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/"))
}

/// Doubles embedded double quotes and wraps the identifier so it can be
/// spliced into generated SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Escapes a string literal for generated SQL handed to the bulk extractor.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_and_lowercases() {
        assert_eq!(normalize("/Atlantis/").unwrap(), "atlantis");
        assert_eq!(normalize("a//B///c").unwrap(), "a/b/c");
    }

    #[test]
    fn normalize_preserves_final_segment_case() {
        assert_eq!(
            normalize_case_sensitive("County/tracts/06075000100A").unwrap(),
            "county/tracts/06075000100A"
        );
        assert_eq!(normalize_case_sensitive("GEOID").unwrap(), "GEOID");
    }

    #[test]
    fn normalize_rejects_bad_substrings() {
        assert!(normalize("a/../b").is_err());
        assert!(normalize("a b").is_err());
        assert!(normalize("a;b").is_err());
        assert!(normalize_case_sensitive("a\tb").is_err());
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_ident("pop"), "\"pop\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
