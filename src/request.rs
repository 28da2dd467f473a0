//! Build request extracted from the inbound webhook parameters

use std::collections::HashMap;

use crate::error::{RelayError, Result};

const MIN_COMMIT_LEN: usize = 4;
const MAX_COMMIT_LEN: usize = 64;

/// A validated request to build and publish one pull request commit.
///
/// Every field is checked before it is used as a path segment, a git
/// reference or part of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Lowercase hex commit id.
    pub commit: String,
    pub pr_number: u64,
    /// `owner/repo` the pull request comes from.
    pub pr_slug: String,
    /// `owner/repo` the pull request targets; the comment is posted there.
    pub target_slug: String,
}

impl BuildRequest {
    /// Reads `commit`, `pr`, `prSlug` and `targetSlug` from the request parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let commit = required(params, "commit")?;
        let pr = required(params, "pr")?;
        let pr_slug = required(params, "prSlug")?;
        let target_slug = required(params, "targetSlug")?;

        Ok(Self {
            commit: validate_commit(commit)?,
            pr_number: validate_pr_number(pr)?,
            pr_slug: validate_slug("prSlug", pr_slug)?,
            target_slug: validate_slug("targetSlug", target_slug)?,
        })
    }
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest(format!("missing required parameter '{}'", name)))
}

pub fn validate_commit(commit: &str) -> Result<String> {
    let len_ok = (MIN_COMMIT_LEN..=MAX_COMMIT_LEN).contains(&commit.len());
    if !len_ok || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RelayError::InvalidRequest(format!(
            "'commit' must be {}-{} hex characters, got {:?}",
            MIN_COMMIT_LEN, MAX_COMMIT_LEN, commit
        )));
    }
    Ok(commit.to_ascii_lowercase())
}

fn validate_pr_number(pr: &str) -> Result<u64> {
    match pr.parse::<u64>() {
        Ok(n) if n > 0 && pr.chars().all(|c| c.is_ascii_digit()) => Ok(n),
        _ => Err(RelayError::InvalidRequest(format!(
            "'pr' must be a positive pull request number, got {:?}",
            pr
        ))),
    }
}

/// Accepts `owner/repo` where both parts are plain GitHub-style names.
pub fn validate_slug(name: &str, slug: &str) -> Result<String> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part != "."
            && part != ".."
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    match slug.split_once('/') {
        Some((owner, repo)) if valid_part(owner) && valid_part(repo) => Ok(slug.to_string()),
        _ => Err(RelayError::InvalidRequest(format!(
            "'{}' must look like 'owner/repo', got {:?}",
            name, slug
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid() -> HashMap<String, String> {
        params(&[
            ("commit", "ABC123def456"),
            ("pr", "42"),
            ("prSlug", "contributor/site"),
            ("targetSlug", "org/site"),
        ])
    }

    #[test]
    fn parses_and_normalizes_a_valid_request() {
        let req = BuildRequest::from_params(&valid()).unwrap();
        assert_eq!(req.commit, "abc123def456");
        assert_eq!(req.pr_number, 42);
        assert_eq!(req.pr_slug, "contributor/site");
        assert_eq!(req.target_slug, "org/site");
    }

    #[test]
    fn rejects_missing_or_blank_parameters() {
        for key in ["commit", "pr", "prSlug", "targetSlug"] {
            let mut p = valid();
            p.remove(key);
            let err = BuildRequest::from_params(&p).unwrap_err();
            assert!(err.to_string().contains(key), "{}", err);

            let mut p = valid();
            p.insert(key.to_string(), "   ".to_string());
            assert!(BuildRequest::from_params(&p).is_err());
        }
    }

    #[test]
    fn rejects_commit_hashes_that_could_escape_the_roots() {
        let too_long = "a".repeat(65);
        for bad in ["../../etc", "abc/def", "abc", "zzzzzz", "deadbeef.", too_long.as_str()] {
            assert!(validate_commit(bad).is_err(), "accepted {:?}", bad);
        }
        assert_eq!(validate_commit("deadbeef").unwrap(), "deadbeef");
        assert_eq!(validate_commit(&"f".repeat(40)).unwrap().len(), 40);
    }

    #[test]
    fn rejects_non_numeric_pull_request_numbers() {
        for bad in ["0", "-1", "+4", "12a", "1/comments"] {
            let mut p = valid();
            p.insert("pr".into(), bad.into());
            assert!(BuildRequest::from_params(&p).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn rejects_malformed_slugs() {
        for bad in [
            "repo",
            "/repo",
            "owner/",
            "owner/repo/extra",
            "../repo",
            "owner/..",
            "own er/repo",
            "owner/repo?x=1",
        ] {
            assert!(validate_slug("prSlug", bad).is_err(), "accepted {:?}", bad);
        }
        assert!(validate_slug("prSlug", "my-org/my_site.io").is_ok());
    }
}
