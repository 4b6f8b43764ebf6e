//! The compiler pipeline.
//!
//! # Data Flow
//! ```text
//! parsed entries
//!     → route_to_regexps per entry        (regex.rs)
//!     → grouped by constant affix         (affix.rs)
//!     → overlap errors reported           (overlap.rs + nfa)
//!     → constant-portion tree             (tree.rs)
//!     → per-family dispatch regexes       (family.rs)
//!     → post-optimized                    (optimize.rs)
//!     → serialized                        (output.rs)
//! ```

pub mod affix;
pub mod family;
pub mod optimize;
pub mod output;
pub mod overlap;
pub mod regex;
pub mod tree;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::Options;
use crate::filter::TagExpr;
use crate::routes::{RouteError, RouteErrorKind, RouteFileEntry};

pub use output::route_regexps_to_json;

/// Group size above which a warning is raised: such routes share no
/// distinguishing constant affix, forcing slow pairwise overlap checks.
pub const BIG_GROUP_WARNING_THRESHOLD: usize = 5;

/// At most this many overlap errors are reported before the rest are
/// suppressed.
pub const MAX_OVERLAPS: usize = 10;

/// A route entry compiled to its regex parts.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub name: String,
    pub line: usize,
    pub filename: String,
    pub(crate) elems: Vec<crate::routes::RouteElement>,
    pub(crate) match_regexp: String,
    /// Constant-portion regex minus the leading first constant.
    pub(crate) cp_regex_tail: String,
    pub(crate) first_constant: String,
    pub(crate) constant_portion: String,
    pub(crate) constish_prefix: String,
    pub(crate) constish_suffix: String,
    pub(crate) n_groups: usize,
    pub(crate) param_group_numbers: BTreeMap<String, usize>,
    pub tags: BTreeSet<String>,
    pub methods: BTreeSet<String>,
    pub(crate) depth: usize,
    pub(crate) terminal: bool,
}

impl CompiledRoute {
    /// The constant-portion regex with the route's first constant
    /// re-emitted starting `offset` bytes in (the tree may have
    /// factored a shared prefix away).
    pub(crate) fn constant_portion_regexp(&self, offset: usize) -> String {
        assert!(
            offset <= self.first_constant.len(),
            "left offset outside first constant"
        );
        let fc = &self.first_constant[offset..];
        if fc.is_empty() {
            return self.cp_regex_tail.clone();
        }
        let mut out = String::with_capacity(fc.len() + self.cp_regex_tail.len() + 2);
        out.push('(');
        regex::regex_escape(fc, &mut out);
        out.push(')');
        out.push_str(&self.cp_regex_tail);
        out
    }

    /// The regex fragment a URL must end with after this route's
    /// pattern: `\/+` for a trailing slash, nothing after `!/`, and an
    /// optional slash run otherwise.
    pub(crate) fn route_term(&self) -> &'static str {
        match self.elems.last() {
            Some(e) if e.is_slash() => "\\/+",
            Some(crate::routes::RouteElement::NoTrailingSlash) => "",
            _ => "\\/*",
        }
    }

    /// A route whose whole pattern was `/`.
    pub(crate) fn is_just_slash(&self) -> bool {
        self.elems.is_empty()
    }

    pub(crate) fn all_const(&self) -> bool {
        self.elems
            .iter()
            .all(|e| e.is_slash() || e.is_constant())
    }

    /// First character of the first constant at the given offset, if
    /// the route starts with a constant that long.
    pub(crate) fn first_char(&self, left_offset: usize) -> Option<char> {
        self.first_constant.get(left_offset..)?.chars().next()
    }
}

/// A route together with its nesting ancestors, all as indices into the
/// compiled-route list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteWithParents {
    pub route: usize,
    pub parents: Vec<usize>,
}

/// One family of terminal routes sharing a constant-portion key.
#[derive(Debug)]
pub struct RouteFamily {
    pub constant_portion: String,
    pub match_regexp: String,
    pub n_levels: usize,
    pub nonparam_group_numbers: Vec<usize>,
    pub members: Vec<FamilyMember>,
}

#[derive(Debug)]
pub struct FamilyMember {
    pub name: String,
    pub param_group_numbers: BTreeMap<String, usize>,
    /// Own tags unioned with every ancestor's, sorted.
    pub tags: Vec<String>,
    /// Methods surviving the filter expression, sorted.
    pub methods: Vec<String>,
}

/// The complete compiled artifact prior to serialization.
#[derive(Debug)]
pub struct RouteRegexps {
    pub constant_portion_regexp: String,
    pub constant_portion_n_groups: usize,
    pub families: Vec<RouteFamily>,
}

/// The methods of a route that individually satisfy the filter
/// expression together with the route's (inherited) tags. With no
/// filter, every method survives.
pub(crate) fn matching_methods(
    filter: Option<&TagExpr>,
    methods: &BTreeSet<String>,
    tags: &BTreeSet<String>,
) -> BTreeSet<String> {
    match filter {
        None => methods.clone(),
        Some(expr) => methods
            .iter()
            .filter(|m| {
                let mut single = BTreeSet::new();
                single.insert((*m).clone());
                expr.eval(tags, &single)
            })
            .cloned()
            .collect(),
    }
}

/// Compile parsed entries into routes, composing nested names, checking
/// duplicate names, and reporting overlapping routes. `observer` is
/// invoked for each affix group larger than the configured threshold.
pub fn process_route_file(
    files: &[Vec<RouteFileEntry>],
    filenames: &[String],
    options: &Options,
    observer: &mut dyn FnMut(&[CompiledRoute], &[RouteWithParents]),
) -> (Vec<CompiledRoute>, Vec<RouteError>) {
    assert_eq!(
        files.len(),
        filenames.len(),
        "one filename per entry list required"
    );

    let mut routes: Vec<CompiledRoute> = Vec::new();
    let mut errors: Vec<RouteError> = Vec::new();

    // name → (file index, line) of each terminal definition
    let mut terminal_lines: BTreeMap<String, Vec<(usize, usize)>> = BTreeMap::new();
    let mut lines_with_entries: HashSet<usize> = HashSet::new();

    struct Level {
        name: String,
        indent: usize,
    }
    let mut levels: Vec<Level> = Vec::new();

    for (fi, file) in files.iter().enumerate() {
        for entry in file {
            lines_with_entries.insert(entry.line);

            while levels
                .last()
                .is_some_and(|level| level.indent >= entry.indent)
            {
                levels.pop();
            }

            let mut name = String::new();
            for level in &levels {
                name.push_str(&level.name);
                name.push_str(&options.name_separator);
            }
            name.push_str(&entry.name);

            if entry.terminal {
                terminal_lines
                    .entry(name.clone())
                    .or_default()
                    .push((fi, entry.line));
            }

            let mut route = regex::route_to_regexps(&entry.pattern);
            route.name = name;
            route.depth = levels.len();
            route.line = entry.line;
            route.filename = filenames[fi].clone();
            route.tags = entry.tags.clone();
            route.methods = entry.methods.clone();
            route.terminal = entry.terminal;

            levels.push(Level {
                name: entry.name.clone(),
                indent: entry.indent,
            });

            routes.push(route);
        }
    }

    let mut terminals: Vec<RouteWithParents> = Vec::new();
    with_parent_routes(&routes, |i, parents| {
        if routes[i].terminal {
            terminals.push(RouteWithParents {
                route: i,
                parents: parents.to_vec(),
            });
        }
    });

    let grouped = affix::group_routes(&routes, &terminals);
    for group in &grouped {
        if group.len() > options.big_group_threshold {
            observer(&routes, group);
        }
    }

    errors.extend(overlap::check_for_overlaps(&routes, &grouped));
    errors.extend(check_nonadjacent_namesakes(
        &terminal_lines,
        &lines_with_entries,
        filenames,
    ));

    (routes, errors)
}

/// Invoke `iter` for each route with the indices of its ancestors.
pub(crate) fn with_parent_routes(
    routes: &[CompiledRoute],
    mut iter: impl FnMut(usize, &[usize]),
) {
    let mut last_level = 0usize;
    let mut parents: Vec<usize> = Vec::new();

    for i in 0..routes.len() {
        let depth = routes[i].depth;
        if depth > last_level && i > 0 {
            parents.push(i - 1);
        } else if depth < last_level {
            parents.truncate(parents.len() - (last_level - depth));
        }
        iter(i, &parents);
        last_level = depth;
    }
}

/// Two terminal routes may share a composed name only when their
/// definitions sit next to each other in the same file.
fn check_nonadjacent_namesakes(
    terminal_lines: &BTreeMap<String, Vec<(usize, usize)>>,
    lines_with_entries: &HashSet<usize>,
    filenames: &[String],
) -> Vec<RouteError> {
    let mut errors = Vec::new();

    for (name, occurrences) in terminal_lines {
        if occurrences.len() <= 1 {
            continue;
        }

        let mut occurrences = occurrences.clone();
        occurrences.sort_by_key(|&(_, line)| line);

        for pair in occurrences.windows(2) {
            let (f1, l1) = pair[0];
            let (f2, l2) = pair[1];
            if f1 != f2 {
                let mut e =
                    RouteError::new(RouteErrorKind::DuplicateRouteName(name.clone()), l1);
                e.other_line = Some(l2);
                e.filenames = vec![filenames[f1].clone(), filenames[f2].clone()];
                errors.push(e);
                break;
            }
            if (l1 + 1..l2).any(|l| lines_with_entries.contains(&l)) {
                let mut e =
                    RouteError::new(RouteErrorKind::DuplicateRouteName(name.clone()), l1);
                e.other_line = Some(l2);
                e.filenames = vec![filenames[f1].clone()];
                errors.push(e);
                break;
            }
        }
    }

    errors
}

/// Turn compiled routes into the final artifact: build and optimize the
/// constant-portion tree, emit and post-optimize the composite regex,
/// and compose each family's dispatch regex.
pub fn get_route_regexps(
    routes: &mut [CompiledRoute],
    filter: Option<&TagExpr>,
) -> RouteRegexps {
    let mut cp_tree = tree::build_constant_portion_tree(routes);
    if let Some(expr) = filter {
        tree::filter_tree(&mut cp_tree, routes, expr);
    }
    tree::optimize_tree(&mut cp_tree, routes);

    let original = tree::constant_portion_regexp_of_tree(&cp_tree, routes);
    let mut scratch = vec![0u8; 64];
    let constant_portion_regexp = optimize::optimize_regex(&original, &mut scratch);
    let constant_portion_n_groups = optimize::count_capture_groups(&constant_portion_regexp);

    let by_cp = tree::families_by_constant_portion(&cp_tree, routes);

    let mut families = Vec::new();
    for (cp, members) in by_cp {
        let terminal_members: Vec<&RouteWithParents> = members
            .iter()
            .filter(|rwp| routes[rwp.route].terminal)
            .collect();
        if terminal_members.is_empty() {
            continue;
        }

        let result = family::disjoin_regexp(routes, &terminal_members);

        let mut family_members = Vec::with_capacity(terminal_members.len());
        for (i, rwp) in terminal_members.iter().enumerate() {
            let route = &routes[rwp.route];

            let mut tags: BTreeSet<String> = route.tags.clone();
            for &p in &rwp.parents {
                tags.extend(routes[p].tags.iter().cloned());
            }

            let methods = matching_methods(filter, &route.methods, &tags);

            family_members.push(FamilyMember {
                name: result.names[i].clone(),
                param_group_numbers: result.param_groups[i].clone(),
                tags: tags.into_iter().collect(),
                methods: methods.into_iter().collect(),
            });
        }

        families.push(RouteFamily {
            constant_portion: cp,
            match_regexp: wrap_match_regexp(&result.regex),
            n_levels: result.n_levels,
            nonparam_group_numbers: result.nonparam_groups,
            members: family_members,
        });
    }

    RouteRegexps {
        constant_portion_regexp: wrap_constant_portion_regexp(&constant_portion_regexp),
        constant_portion_n_groups,
        families,
    }
}

/// Anchor the constant-portion regex and absorb any query/fragment.
fn wrap_constant_portion_regexp(re: &str) -> String {
    format!("^{re}(?:\\?[^#]*)?(?:#.*)?$")
}

/// Anchor a family match regex; the last two captures are always the
/// optional query and fragment.
fn wrap_match_regexp(re: &str) -> String {
    format!("^{re}(\\?[^#]*)?(#.*)?$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{parse_route_files, CasePolicy};

    fn options() -> Options {
        Options {
            case_policy: CasePolicy::AllowUpperCase,
            ..Options::default()
        }
    }

    fn compile_ok(text: &str) -> (Vec<CompiledRoute>, RouteRegexps) {
        let inputs = vec![("test.routes".to_string(), text.to_string())];
        let (files, errors) = parse_route_files(&inputs, CasePolicy::AllowUpperCase);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        let filenames = vec!["test.routes".to_string()];
        let (mut routes, errors) =
            process_route_file(&files, &filenames, &options(), &mut |_, _| {});
        assert!(errors.is_empty(), "process errors: {:?}", errors);
        let rrs = get_route_regexps(&mut routes, None);
        (routes, rrs)
    }

    fn process_errors(text: &str) -> Vec<RouteError> {
        let inputs = vec![("test.routes".to_string(), text.to_string())];
        let (files, errors) = parse_route_files(&inputs, CasePolicy::AllowUpperCase);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        let filenames = vec!["test.routes".to_string()];
        let (_, errors) = process_route_file(&files, &filenames, &options(), &mut |_, _| {});
        errors
    }

    #[test]
    fn test_composed_names() {
        let (routes, _) = compile_ok("users /users\n  home /:id/home\n    deep /deep\n");
        assert_eq!(routes[0].name, "users");
        assert_eq!(routes[1].name, "users/home");
        assert_eq!(routes[2].name, "users/home/deep");
        assert_eq!(routes[2].depth, 2);
    }

    #[test]
    fn test_overlap_detected() {
        let errors = process_errors("foo /foo\nbar /foo\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, RouteErrorKind::OverlappingRoutes);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[0].other_line, Some(2));
    }

    #[test]
    fn test_overlap_suppressed_for_disjoint_methods() {
        let errors = process_errors("foo [GET] /x\nbar [PUT,POST] /x\n");
        assert!(errors.is_empty(), "unexpected: {:?}", errors);
    }

    #[test]
    fn test_no_overlap_for_distinct_routes() {
        let errors = process_errors("foo /foo\nbar /bar\nparam /p/:id\n");
        assert!(errors.is_empty(), "unexpected: {:?}", errors);
    }

    #[test]
    fn test_duplicate_names_nonadjacent() {
        let errors = process_errors("a /x\nb /y\na /z\n");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].kind,
            RouteErrorKind::DuplicateRouteName(ref name) if name == "a"
        ));
    }

    #[test]
    fn test_duplicate_names_adjacent_allowed() {
        let errors = process_errors("a /x\na /y\n");
        assert!(errors.is_empty(), "unexpected: {:?}", errors);
    }

    #[test]
    fn test_big_group_observer() {
        // Six parameter-only routes share the empty affix and exceed
        // the default threshold. They also all overlap, so only the
        // observer call is of interest here.
        let text = "a /:p1\nb /:p2\nc /:p3\nd /:p4\ne /:p5\nf /:p6\n";
        let inputs = vec![("t".to_string(), text.to_string())];
        let (files, _) = parse_route_files(&inputs, CasePolicy::AllowUpperCase);
        let filenames = vec!["t".to_string()];
        let mut seen_sizes = Vec::new();
        let _ = process_route_file(&files, &filenames, &options(), &mut |_, group| {
            seen_sizes.push(group.len())
        });
        assert_eq!(seen_sizes, vec![6]);
    }

    #[test]
    fn test_overlap_errors_capped() {
        // Every pair of these routes overlaps; far more than the cap.
        let mut text = String::new();
        for i in 0..8 {
            text.push_str(&format!("r{i} /:p{i}\n"));
        }
        let errors = process_errors(&text);
        assert_eq!(errors.len(), MAX_OVERLAPS);
    }

    #[test]
    fn test_artifact_structure() {
        let (_, rrs) = compile_ok("users /users\n  home /:id/home\n");
        assert!(rrs.constant_portion_regexp.starts_with('^'));
        assert!(rrs.constant_portion_regexp.ends_with("(?:#.*)?$"));
        assert!(rrs.constant_portion_n_groups > 0);

        let keys: Vec<&str> = rrs
            .families
            .iter()
            .map(|f| f.constant_portion.as_str())
            .collect();
        assert_eq!(keys, vec!["users//home"]);
        assert_eq!(rrs.families[0].members[0].name, "users/home");
        assert_eq!(
            rrs.families[0].members[0].methods,
            vec!["GET".to_string()]
        );
    }

    #[test]
    fn test_family_key_sorted_and_members_in_order() {
        let (_, rrs) = compile_ok("b /z/:p\na /a/:p\nsame1 /s/:p\nsame2 [POST] /s/:q\n");
        let keys: Vec<&str> = rrs
            .families
            .iter()
            .map(|f| f.constant_portion.as_str())
            .collect();
        assert_eq!(keys, vec!["a/", "s/", "z/"]);
        let members: Vec<&str> = rrs.families[1]
            .members
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(members, vec!["same1", "same2"]);
    }

    #[test]
    fn test_inherited_tags() {
        let (_, rrs) = compile_ok("users /users [base]\n  home /:id/home [leaf]\n");
        assert_eq!(
            rrs.families[0].members[0].tags,
            vec!["base".to_string(), "leaf".to_string()]
        );
    }

    #[test]
    fn test_determinism_across_runs() {
        let text = "users /users\n  home /:id/home\nmanagers /managers\n  stats /:id/stats\n";
        let (_, rrs1) = compile_ok(text);
        let (_, rrs2) = compile_ok(text);
        let (bytes1, _) = route_regexps_to_json(&rrs1);
        let (bytes2, _) = route_regexps_to_json(&rrs2);
        assert_eq!(bytes1, bytes2);
    }
}
