//! Route-file parsing.
//!
//! # Responsibilities
//! - Define the route-pattern element model shared by both input grammars
//! - Parse the line-oriented route grammar (`parse`)
//! - Parse the JSON route grammar (`json`)
//! - Collect located errors (`error`)
//!
//! # Design Decisions
//! - Files are read fully before parsing; parsing is then pure and can
//!   fan out one worker per file, with results reassembled in input order
//! - Inputs named `*.json` use the JSON grammar, everything else
//!   (including stdin) the line grammar

pub mod error;
pub mod json;
pub mod parse;

use std::collections::BTreeSet;

use rayon::prelude::*;

pub use error::{sort_route_errors, RouteError, RouteErrorKind};

/// One element of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteElement {
    /// Path separator. Runs of `/` in a URL collapse to one.
    Slash,
    /// Literal text containing no `/`.
    Constant(String),
    /// Named `[^/?#]+` capture.
    Parameter(String),
    /// Named `-?[0-9]+` capture.
    IntegerParameter(String),
    /// Named capture spanning the rest of the path.
    RestParameter(String),
    /// Unnamed single-segment wildcard.
    SingleGlob,
    /// Unnamed multi-segment wildcard.
    DoubleGlob,
    /// The route must not end in `/`. Only legal as the last element.
    NoTrailingSlash,
}

impl RouteElement {
    pub fn is_slash(&self) -> bool {
        matches!(self, RouteElement::Slash)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, RouteElement::Constant(_))
    }
}

/// A parsed route-file entry, prior to compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFileEntry {
    pub indent: usize,
    pub name: String,
    pub pattern: Vec<RouteElement>,
    pub line: usize,
    /// When false the entry exists only as a parent for nested routes.
    pub terminal: bool,
    pub tags: BTreeSet<String>,
    pub methods: BTreeSet<String>,
}

/// Case policy for constants in route patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CasePolicy {
    AllowUpperCase,
    #[default]
    DisallowUpperCase,
}

/// A lexed pattern element: either a real element or an error marker
/// produced in place. Markers are reported and then stripped before
/// compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lexed {
    Elem(RouteElement),
    Illegal(RouteErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LexedElem {
    pub item: Lexed,
    pub col: usize,
}

impl LexedElem {
    pub fn element(&self) -> Option<&RouteElement> {
        match &self.item {
            Lexed::Elem(e) => Some(e),
            Lexed::Illegal(_) => None,
        }
    }
}

/// Parse all input files, one worker per file. `inputs` pairs a display
/// name with the file's full contents. Entries and errors come back in
/// input order.
pub fn parse_route_files(
    inputs: &[(String, String)],
    case_policy: CasePolicy,
) -> (Vec<Vec<RouteFileEntry>>, Vec<RouteError>) {
    let parsed: Vec<(Vec<RouteFileEntry>, Vec<RouteError>)> = inputs
        .par_iter()
        .map(|(name, text)| {
            let (entries, mut errors) = if name.ends_with(".json") {
                json::parse_json_route_file(text, case_policy)
            } else {
                parse::parse_route_file(text, case_policy)
            };
            for e in &mut errors {
                e.filenames = vec![name.clone()];
            }
            (entries, errors)
        })
        .collect();

    let mut entries_per_file = Vec::with_capacity(parsed.len());
    let mut all_errors = Vec::new();
    for (entries, errors) in parsed {
        entries_per_file.push(entries);
        all_errors.extend(errors);
    }
    (entries_per_file, all_errors)
}

/// Validate a lexed pattern, returning the violated rules.
pub(crate) fn validate_route_elems(
    initial_indent: usize,
    indent: usize,
    elems: &[LexedElem],
) -> Vec<RouteErrorKind> {
    if elems.is_empty() {
        return vec![RouteErrorKind::MissingNameOrRoute];
    }

    let mut errors = Vec::new();

    for pair in elems.windows(2) {
        let both_slash = matches!(pair[0].element(), Some(RouteElement::Slash))
            && matches!(pair[1].element(), Some(RouteElement::Slash));
        if both_slash {
            errors.push(RouteErrorKind::MultipleSlashesInARow);
            break;
        }
    }

    if indent == initial_indent && !matches!(elems[0].element(), Some(RouteElement::Slash)) {
        errors.push(RouteErrorKind::RootMustStartWithSlash);
    }

    if matches!(
        elems.last().and_then(LexedElem::element),
        Some(RouteElement::NoTrailingSlash)
    ) {
        if elems.len() == 1 {
            errors.push(RouteErrorKind::OnlyNoTrailingSlash);
        } else if matches!(
            elems[elems.len() - 2].element(),
            Some(RouteElement::Slash)
        ) {
            errors.push(RouteErrorKind::NoTrailingSlashAfterSlash);
        }
    }

    errors
}
