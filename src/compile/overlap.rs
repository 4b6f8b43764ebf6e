//! Overlap checking across affix groups.
//!
//! Each group's routes are expanded to their full match regexes
//! (ancestors joined by `\/+`, route term appended), compiled to NFAs,
//! and checked pairwise with the product-automaton walk in `crate::nfa`.
//! Overlaps between routes with disjoint method sets are not errors:
//! the two routes can never claim the same request.

use crate::nfa::{find_overlaps, Nfa};
use crate::routes::{RouteError, RouteErrorKind};

use super::{CompiledRoute, RouteWithParents, MAX_OVERLAPS};

/// Report overlapping route pairs, at most [`MAX_OVERLAPS`] in total;
/// anything further is suppressed to avoid flooding the user.
pub(crate) fn check_for_overlaps(
    routes: &[CompiledRoute],
    grouped: &[Vec<RouteWithParents>],
) -> Vec<RouteError> {
    let mut errors = Vec::new();

    'groups: for group in grouped {
        for (r1, r2) in overlaps_within_group(routes, group) {
            if errors.len() >= MAX_OVERLAPS {
                break 'groups;
            }
            let mut e = RouteError::new(RouteErrorKind::OverlappingRoutes, routes[r1].line);
            e.other_line = Some(routes[r2].line);
            e.filenames = vec![routes[r1].filename.clone(), routes[r2].filename.clone()];
            errors.push(e);
        }
    }

    errors
}

/// Pairwise overlap check within one affix group, returning route-index
/// pairs whose methods intersect.
fn overlaps_within_group(
    routes: &[CompiledRoute],
    group: &[RouteWithParents],
) -> Vec<(usize, usize)> {
    let nfas: Vec<Nfa> = group
        .iter()
        .map(|rwp| {
            let re = full_match_regexp(routes, rwp);
            Nfa::parse(&re).expect("compiler-emitted regex must be NFA-compatible")
        })
        .collect();

    find_overlaps(&nfas)
        .into_iter()
        .filter_map(|(i, j)| {
            let r1 = group[i].route;
            let r2 = group[j].route;
            let method_in_common = routes[r1]
                .methods
                .intersection(&routes[r2].methods)
                .next()
                .is_some();
            method_in_common.then_some((r1, r2))
        })
        .collect()
}

/// The route's complete match regex: leading slash run, ancestors
/// joined by slash runs, the route itself, and its trailing term.
fn full_match_regexp(routes: &[CompiledRoute], rwp: &RouteWithParents) -> String {
    let mut re = String::from("\\/+");
    for (i, &p) in rwp.parents.iter().enumerate() {
        if i != 0 {
            re.push_str("\\/+");
        }
        re.push_str(&routes[p].match_regexp);
    }
    if !rwp.parents.is_empty() {
        re.push_str("\\/+");
    }
    re.push_str(&routes[rwp.route].match_regexp);
    re.push_str(routes[rwp.route].route_term());
    re
}
