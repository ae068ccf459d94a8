//! Slug and database-name derivation
//!
//! A slug is the URL-safe unique identifier of a branch; the database name is
//! the Postgres identifier its physical database is created under.

use crate::error::{BranchError, BranchResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum slug length
pub const MAX_SLUG_LEN: usize = 50;

/// Postgres identifier length limit
pub const MAX_IDENT_LEN: usize = 63;

/// Reserved slug of the main branch
pub const MAIN_SLUG: &str = "main";

static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid slug regex"));

/// Derive a slug from a human-readable branch name.
///
/// Lower-cases, maps whitespace and underscores to hyphens, drops anything
/// outside `[a-z0-9-]`, collapses hyphen runs, trims edge hyphens and caps
/// the result at [`MAX_SLUG_LEN`]. An input with no usable characters yields
/// `"branch"`.
pub fn generate_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = false;

    for ch in name.to_lowercase().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            ' ' | '\t' | '_' | '-' => Some('-'),
            _ => None,
        };
        if let Some(c) = mapped {
            if c == '-' {
                if !last_hyphen && !slug.is_empty() {
                    slug.push('-');
                    last_hyphen = true;
                }
            } else {
                slug.push(c);
                last_hyphen = false;
            }
        }
    }

    let mut slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        slug = "branch".to_string();
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }
    slug
}

/// Validate a caller-supplied slug.
///
/// Rejects the reserved main slug, anything over [`MAX_SLUG_LEN`] and
/// anything not matching the slug pattern.
pub fn validate_slug(slug: &str) -> BranchResult<()> {
    if slug.is_empty() {
        return Err(BranchError::InvalidSlug("slug must not be empty".to_string()));
    }
    if slug == MAIN_SLUG {
        return Err(BranchError::InvalidSlug(format!(
            "'{}' is reserved for the main branch",
            MAIN_SLUG
        )));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(BranchError::InvalidSlug(format!(
            "slug exceeds {} characters",
            MAX_SLUG_LEN
        )));
    }
    if !SLUG_RE.is_match(slug) {
        return Err(BranchError::InvalidSlug(format!(
            "slug '{}' must match {}",
            slug,
            SLUG_RE.as_str()
        )));
    }
    Ok(())
}

/// Convert a slug into a valid Postgres database identifier.
///
/// Hyphens become underscores; a leading digit is prefixed with an
/// underscore; the result is capped at the engine's 63-byte identifier limit.
pub fn generate_database_name(slug: &str) -> String {
    let mut name: String = slug.replace('-', "_");
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if name.len() > MAX_IDENT_LEN {
        name.truncate(MAX_IDENT_LEN);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generate_slug_basic() {
        assert_eq!(generate_slug("Feature X"), "feature-x");
        assert_eq!(generate_slug("my_new_branch"), "my-new-branch");
        assert_eq!(generate_slug("PR #42 (retry!)"), "pr-42-retry");
    }

    #[test]
    fn test_generate_slug_collapses_and_trims_hyphens() {
        assert_eq!(generate_slug("--a  __  b--"), "a-b");
        assert_eq!(generate_slug("a---b"), "a-b");
    }

    #[test]
    fn test_generate_slug_empty_falls_back() {
        assert_eq!(generate_slug(""), "branch");
        assert_eq!(generate_slug("!!!"), "branch");
        assert_eq!(generate_slug("---"), "branch");
    }

    #[test]
    fn test_generate_slug_truncates_without_trailing_hyphen() {
        let long = "a ".repeat(60);
        let slug = generate_slug(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_generated_slugs_always_validate() {
        for name in [
            "Feature X",
            "UPPER case",
            "émoji 🎉 name",
            "   spaces   ",
            "123-starts-with-digit",
            &"x".repeat(200),
        ] {
            let slug = generate_slug(name);
            assert!(validate_slug(&slug).is_ok(), "slug {:?} from {:?}", slug, name);
        }
    }

    #[test]
    fn test_validate_slug_rejections() {
        assert!(validate_slug("").is_err());
        assert!(validate_slug("main").is_err());
        assert!(validate_slug(&"a".repeat(51)).is_err());
        assert!(validate_slug("Has-Upper").is_err());
        assert!(validate_slug("under_score").is_err());
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("trailing-").is_err());
    }

    #[test]
    fn test_validate_slug_accepts_valid() {
        assert!(validate_slug("feature-x").is_ok());
        assert!(validate_slug("pr-42").is_ok());
        assert!(validate_slug("a").is_ok());
        assert!(validate_slug(&"a".repeat(50)).is_ok());
    }

    #[test]
    fn test_generate_database_name() {
        assert_eq!(generate_database_name("feature-x"), "feature_x");
        assert_eq!(generate_database_name("42-fix"), "_42_fix");
    }

    #[test]
    fn test_database_name_never_starts_with_digit_and_fits() {
        for slug in ["9", "1-2-3", &"7".repeat(80)] {
            let name = generate_database_name(slug);
            assert!(!name.chars().next().unwrap().is_ascii_digit());
            assert!(name.len() <= MAX_IDENT_LEN);
        }
    }
}
