//! Route-compilation error kinds and reporting.

use thiserror::Error;

/// Everything that can go wrong while parsing and compiling route files.
///
/// Kinds carry no location; the enclosing [`RouteError`] does.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteErrorKind {
    #[error("missing route name or missing route pattern")]
    MissingNameOrRoute,

    /// Two terminal routes share a composed name without being adjacent.
    #[error("two non-adjacently-nestled routes have the same name ('{0}'); move them next to each other in the same file")]
    DuplicateRouteName(String),

    #[error("pattern at root level must start with '/'")]
    RootMustStartWithSlash,

    #[error("routes overlap")]
    OverlappingRoutes,

    #[error("misplaced '.': should come immediately after parent route and be indented under it")]
    MisplacedDot,

    #[error("route contains bad code point")]
    RouteContainsBadCodePoint,

    #[error("route may not contain '?'")]
    QuestionMarkInRoute,

    #[error("route may not contain '#'")]
    HashInRoute,

    #[error("route may not contain whitespace")]
    WhitespaceInRoute,

    #[error("illegal character in parameter name")]
    IllegalCharInParamName,

    #[error("illegal backslash escape")]
    IllegalBackslashEscape,

    #[error("illegal backslash escape in route name")]
    IllegalBackslashEscapeInRouteName,

    #[error("route is indented with a whitespace character other than a tab or a space")]
    NontabspaceIndentationCharacter,

    #[error("bad character in method name")]
    BadCharacterInMethodName,

    #[error("missing comma between method names")]
    MissingCommaBetweenMethodNames,

    #[error("two commas in sequence in list of method names")]
    TwoCommasInSequenceInMethodNames,

    #[error("the line is indented less than the first non-blank line of the input file")]
    IndentLessThanFirstLine,

    #[error("the route consists entirely of a '!/' prohibition on trailing slashes")]
    OnlyNoTrailingSlash,

    #[error("the '!/' sequence banning trailing slashes follows a slash")]
    NoTrailingSlashAfterSlash,

    #[error("multiple slashes in a row in route")]
    MultipleSlashesInARow,

    #[error("upper case character in route")]
    UpperCaseCharInRoute,

    #[error("IO error: {0}")]
    Io(String),

    #[error("empty method list")]
    EmptyMethodList,

    // JSON route-file variant.
    #[error("invalid JSON in JSON route file: {0}")]
    InvalidJsonInJsonRouteFile(String),

    #[error("expected JSON route file to be array")]
    ExpectedJsonRoutesToBeArray,

    #[error("expected route file entry to be object in JSON route file")]
    ExpectedJsonRouteFileEntryToBeObject,

    #[error("unexpected key or key value type in JSON route file")]
    UnexpectedKeyInJsonRouteFile,

    #[error("route missing name field in JSON route file")]
    JsonRouteMissingNameField,

    #[error("route missing pattern field in JSON route file")]
    JsonRouteMissingPatternField,

    #[error("unexpected token in JSON route file")]
    UnexpectedTokenInJsonRouteFile,

    #[error("no '/' allowed inside JSON route pattern element")]
    NoSlashInsideJsonRoutePatternElement,

    #[error("first member of pattern element must be string")]
    FirstMemberOfPatternElementMustBeString,

    #[error("bad first member of pattern element")]
    BadFirstMemberOfPatternElement,

    #[error("unexpected pattern element member")]
    UnexpectedPatternElementMember,

    #[error("parameter name must be string")]
    ParameterNameMustBeString,
}

/// A located route error.
///
/// `filenames` holds one entry for most errors and two for pairwise
/// errors (duplicate names or overlaps spanning files); `other_line` is
/// the second location of a pairwise error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteError {
    pub kind: RouteErrorKind,
    pub line: usize,
    pub col: Option<usize>,
    pub other_line: Option<usize>,
    pub filenames: Vec<String>,
}

impl RouteError {
    pub fn new(kind: RouteErrorKind, line: usize) -> RouteError {
        RouteError {
            kind,
            line,
            col: None,
            other_line: None,
            filenames: Vec::new(),
        }
    }

    pub fn with_col(mut self, col: usize) -> RouteError {
        self.col = Some(col);
        self
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let file = |i: usize| -> &str {
            match self.filenames.get(i).map(String::as_str) {
                None | Some("") => "stdin",
                Some(name) => name,
            }
        };

        match self.other_line {
            Some(other) if self.filenames.len() == 2 => write!(
                f,
                "{}:{}: (and {}:{}): {}",
                file(0),
                self.line,
                file(1),
                other,
                self.kind
            ),
            Some(other) => write!(f, "{}: (and {}): {}", self.line, other, self.kind),
            None => match self.col {
                Some(col) => write!(f, "{}:{}:{}: {}", file(0), self.line, col, self.kind),
                None => write!(f, "{}:{}: {}", file(0), self.line, self.kind),
            },
        }
    }
}

/// Sort errors for reporting: by first filename, then line, then the
/// other line of pairwise errors.
pub fn sort_route_errors(errors: &mut [RouteError]) {
    errors.sort_by(|a, b| {
        let fa = a.filenames.first();
        let fb = b.filenames.first();
        fa.cmp(&fb)
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.other_line.cmp(&b.other_line))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let mut err = RouteError::new(RouteErrorKind::HashInRoute, 3);
        err.filenames = vec!["routes.txt".to_string()];
        assert_eq!(err.to_string(), "routes.txt:3: route may not contain '#'");

        let err = RouteError::new(RouteErrorKind::UpperCaseCharInRoute, 7).with_col(12);
        assert_eq!(err.to_string(), "stdin:7:12: upper case character in route");
    }

    #[test]
    fn test_pairwise_error_display() {
        let mut err = RouteError::new(RouteErrorKind::OverlappingRoutes, 1);
        err.other_line = Some(2);
        err.filenames = vec!["a.txt".to_string(), "b.txt".to_string()];
        assert_eq!(err.to_string(), "a.txt:1: (and b.txt:2): routes overlap");
    }

    #[test]
    fn test_sort_route_errors() {
        let mk = |file: &str, line: usize, other: Option<usize>| {
            let mut e = RouteError::new(RouteErrorKind::OverlappingRoutes, line);
            e.other_line = other;
            e.filenames = vec![file.to_string()];
            e
        };
        let mut errors = vec![
            mk("b.txt", 1, None),
            mk("a.txt", 9, Some(12)),
            mk("a.txt", 9, Some(4)),
            mk("a.txt", 2, None),
        ];
        sort_route_errors(&mut errors);
        assert_eq!(errors[0].line, 2);
        assert_eq!(errors[1].other_line, Some(4));
        assert_eq!(errors[2].other_line, Some(12));
        assert_eq!(errors[3].filenames[0], "b.txt");
    }
}
