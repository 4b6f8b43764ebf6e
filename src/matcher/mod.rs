//! The runtime matcher.
//!
//! # Responsibilities
//! - Deserialize a compiled artifact
//! - Resolve a URL in one constant-portion replace, one family regex
//!   match, and a binary search over the dispatch groups
//! - Return the route name, parameters, query, and fragment
//!
//! # Design Decisions
//! - Immutable after construction; each `route` call is synchronous and
//!   stateless
//! - Group references in the replacement string use `${n}` so that
//!   two-digit group numbers cannot be misread

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Errors constructing a router from artifact bytes.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The artifact is not the expected JSON document.
    #[error("invalid routes artifact: {0}")]
    Json(#[from] serde_json::Error),

    /// A regex in the artifact failed to compile.
    #[error("invalid regex in routes artifact: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArtifact {
    #[serde(rename = "constantPortionNGroups")]
    constant_portion_n_groups: usize,
    #[serde(rename = "constantPortionRegexp")]
    constant_portion_regexp: String,
    families: HashMap<String, RawFamily>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFamily {
    #[serde(rename = "matchRegexp")]
    match_regexp: String,
    #[serde(rename = "nLevels")]
    n_levels: usize,
    #[serde(rename = "nonparamGroupNumbers")]
    nonparam_group_numbers: Vec<usize>,
    members: Vec<RawMember>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMember {
    name: String,
    #[serde(rename = "paramGroupNumbers")]
    param_group_numbers: HashMap<String, usize>,
    tags: Vec<String>,
    methods: Vec<String>,
}

struct Family {
    match_regexp: Regex,
    n_levels: usize,
    nonparam_group_numbers: Vec<usize>,
    members: Vec<RawMember>,
}

/// A deserialized artifact, ready to match URLs.
pub struct Router {
    constant_portion_regexp: Regex,
    replacement: String,
    families: HashMap<String, Family>,
    case_sensitive: bool,
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub name: String,
    pub params: HashMap<String, String>,
    pub query: String,
    pub anchor: String,
    pub tags: Vec<String>,
    pub methods: Vec<String>,
}

impl Router {
    /// Build a router from artifact JSON. With `case_sensitive` false,
    /// the URL path is lower-cased before matching, the artifact's
    /// regexes match case-insensitively, and family keys are lowered to
    /// agree with the captures.
    pub fn from_json(artifact: &[u8], case_sensitive: bool) -> Result<Router, RouterError> {
        let raw: RawArtifact = serde_json::from_slice(artifact)?;

        // The replacement starts with a padding byte so that a matching
        // URL can never replace to itself.
        let mut replacement = String::from(" ");
        for i in 1..=raw.constant_portion_n_groups {
            replacement.push_str(&format!("${{{i}}}"));
        }

        let compile = |re: &str| -> Result<Regex, regex::Error> {
            if case_sensitive {
                Regex::new(re)
            } else {
                Regex::new(&format!("(?i){re}"))
            }
        };

        let mut families = HashMap::with_capacity(raw.families.len());
        for (key, f) in raw.families {
            let key = if case_sensitive {
                key
            } else {
                key.to_lowercase()
            };
            families.insert(
                key,
                Family {
                    match_regexp: compile(&f.match_regexp)?,
                    n_levels: f.n_levels,
                    nonparam_group_numbers: f.nonparam_group_numbers,
                    members: f.members,
                },
            );
        }

        Ok(Router {
            constant_portion_regexp: compile(&raw.constant_portion_regexp)?,
            replacement,
            families,
            case_sensitive,
        })
    }

    /// Resolve a URL to a route, or `None` if nothing matches.
    pub fn route(&self, url: &str) -> Option<RouteMatch> {
        let url = if self.case_sensitive {
            std::borrow::Cow::Borrowed(url)
        } else {
            normalize_url(url)
        };

        let replaced = self
            .constant_portion_regexp
            .replace(&url, self.replacement.as_str());
        if replaced == url {
            return None;
        }
        // Strip the padding byte to obtain the family key.
        let key = &replaced[1..];

        let family = self.families.get(key)?;

        let captures = family.match_regexp.captures(&url)?;

        let member_index = find_group_index(
            &captures,
            &family.nonparam_group_numbers,
            family.n_levels,
        );
        let member = &family.members[member_index];

        let mut params = HashMap::with_capacity(member.param_group_numbers.len());
        for (name, &group) in &member.param_group_numbers {
            let value = captures.get(group).map_or("", |m| m.as_str());
            params.insert(name.clone(), value.to_string());
        }

        let capture_at = |i: usize| {
            captures
                .get(i)
                .map_or(String::new(), |m| m.as_str().to_string())
        };

        Some(RouteMatch {
            name: member.name.clone(),
            params,
            query: capture_at(captures.len() - 2),
            anchor: capture_at(captures.len() - 1),
            tags: member.tags.clone(),
            methods: member.methods.clone(),
        })
    }
}

/// Walk the balanced dispatch tree: at each level an empty non-param
/// capture sends the search to the right half.
fn find_group_index(
    captures: &regex::Captures<'_>,
    nonparam_group_numbers: &[usize],
    n_levels: usize,
) -> usize {
    let mut mi = 0usize;
    let mut n_leaves = 1usize << (n_levels - 1);
    let mut gi = 0usize;

    for _ in 0..n_levels {
        let group = nonparam_group_numbers[mi];
        let matched = captures.get(group).is_some_and(|m| !m.as_str().is_empty());
        if !matched {
            gi += n_leaves;
            mi += n_leaves * 2;
        } else {
            mi += 1;
        }
        n_leaves /= 2;
    }

    gi
}

/// Lower-case the path portion of a URL (anything before `?`).
fn normalize_url(url: &str) -> std::borrow::Cow<'_, str> {
    match url.find('?') {
        None => {
            if url.chars().any(char::is_uppercase) {
                std::borrow::Cow::Owned(url.to_lowercase())
            } else {
                std::borrow::Cow::Borrowed(url)
            }
        }
        Some(q) => {
            let (path, rest) = url.split_at(q);
            if path.chars().any(char::is_uppercase) {
                std::borrow::Cow::Owned(format!("{}{}", path.to_lowercase(), rest))
            } else {
                std::borrow::Cow::Borrowed(url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("/Foo/Bar"), "/foo/bar");
        assert_eq!(normalize_url("/foo"), "/foo");
        assert_eq!(normalize_url("/FOO?Q=V"), "/foo?Q=V");
        assert_eq!(normalize_url("/foo?Q=V"), "/foo?Q=V");
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let artifact = br#"{"constantPortionNGroups":0,"constantPortionRegexp":"^$","families":{},"zap":1}"#;
        assert!(Router::from_json(artifact, true).is_err());
    }

    #[test]
    fn test_rejects_bad_regex() {
        let artifact =
            br#"{"constantPortionNGroups":0,"constantPortionRegexp":"(","families":{}}"#;
        assert!(Router::from_json(artifact, true).is_err());
    }
}
