//! Compiler options.
//!
//! All options come from command-line flags; there is no config file.

pub use crate::routes::CasePolicy;

/// Options threaded through the compile pipeline.
#[derive(Debug, Clone)]
pub struct Options {
    /// Separator between nested route names ("users" + "home" →
    /// "users/home" with the default).
    pub name_separator: String,

    /// Whether upper-case characters are allowed in route constants.
    pub case_policy: CasePolicy,

    /// Affix-group size above which a warning is raised.
    pub big_group_threshold: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            name_separator: "/".to_string(),
            case_policy: CasePolicy::DisallowUpperCase,
            big_group_threshold: crate::compile::BIG_GROUP_WARNING_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.name_separator, "/");
        assert_eq!(options.case_policy, CasePolicy::DisallowUpperCase);
        assert_eq!(options.big_group_threshold, 5);
    }
}
