//! The per-family composite match regex.
//!
//! A family's members are disjoined into one regex wrapped in a
//! balanced-binary tree of capture groups: member `i` opens one group
//! per dispatch level that starts at `i` and closes one per level that
//! ends at `i`. At runtime, testing `⌈log₂ n⌉` of those "level" groups
//! for emptiness identifies the matching member without trying each
//! alternative in turn.

use std::collections::BTreeMap;

use super::{CompiledRoute, RouteWithParents};

pub(crate) struct DisjoinResult {
    pub regex: String,
    pub param_groups: Vec<BTreeMap<String, usize>>,
    pub names: Vec<String>,
    pub nonparam_groups: Vec<usize>,
    pub n_levels: usize,
}

/// Disjoin the members' full match regexes (parents joined by `\/+`)
/// into one dispatch-grouped regex.
pub(crate) fn disjoin_regexp(
    routes: &[CompiledRoute],
    members: &[&RouteWithParents],
) -> DisjoinResult {
    let mut n_levels = 1usize;
    let mut n_leaves = 2usize;
    while n_leaves < members.len() {
        n_levels += 1;
        n_leaves *= 2;
    }

    let mut sb = String::from("(?:");

    let mut param_groups: Vec<BTreeMap<String, usize>> = Vec::with_capacity(members.len());
    let mut names: Vec<String> = Vec::with_capacity(members.len());
    let mut nonparam_groups: Vec<usize> = Vec::new();
    let mut current_group = 1usize;
    let mut balance = 0usize;

    for (i, rwp) in members.iter().enumerate() {
        if i != 0 {
            sb.push('|');
        }

        // Open one group per dispatch level beginning at this member.
        let mut m = 2;
        for _ in 0..n_levels - 1 {
            if i % m == 0 {
                sb.push('(');
                balance += 1;
                nonparam_groups.push(current_group);
                current_group += 1;
            }
            m *= 2;
        }

        sb.push_str("(\\/+");
        nonparam_groups.push(current_group);
        current_group += 1;

        for (j, &p) in rwp.parents.iter().enumerate() {
            if j != 0 && !routes[rwp.parents[j - 1]].is_just_slash() {
                sb.push_str("\\/+");
            }
            sb.push_str(&routes[p].match_regexp);
        }
        if let Some(&last) = rwp.parents.last() {
            if !routes[last].is_just_slash() {
                sb.push_str("\\/+");
            }
        }
        let r = &routes[rwp.route];
        sb.push_str(&r.match_regexp);
        sb.push_str(r.route_term());

        names.push(r.name.clone());

        // Groups are numbered from 1; parents' parameters first.
        let mut pg: BTreeMap<String, usize> = BTreeMap::new();
        for &p in &rwp.parents {
            for (k, v) in &routes[p].param_group_numbers {
                pg.insert(k.clone(), current_group + v - 1);
            }
            current_group += routes[p].n_groups;
        }
        for (k, v) in &r.param_group_numbers {
            pg.insert(k.clone(), current_group + v - 1);
        }
        current_group += r.n_groups;
        param_groups.push(pg);

        sb.push(')');

        let mut m = 2;
        for _ in 0..n_levels - 1 {
            if i % m == m - 1 {
                sb.push(')');
                balance -= 1;
            }
            m *= 2;
        }
    }

    for _ in 0..balance {
        sb.push(')');
    }

    sb.push(')');

    DisjoinResult {
        regex: sb,
        param_groups,
        names,
        nonparam_groups,
        n_levels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::regex::route_to_regexps;
    use crate::routes::parse::parse_route;
    use crate::routes::Lexed;

    fn route(name: &str, pattern: &str) -> CompiledRoute {
        let elems: Vec<_> = parse_route(pattern)
            .into_iter()
            .filter_map(|le| match le.item {
                Lexed::Elem(e) => Some(e),
                Lexed::Illegal(_) => None,
            })
            .collect();
        let mut r = route_to_regexps(&elems);
        r.name = name.to_string();
        r
    }

    fn members_of(n: usize) -> Vec<RouteWithParents> {
        (0..n)
            .map(|i| RouteWithParents {
                route: i,
                parents: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_single_member() {
        let routes = vec![route("r", "/foo/:id")];
        let members = members_of(1);
        let refs: Vec<&RouteWithParents> = members.iter().collect();
        let result = disjoin_regexp(&routes, &refs);

        assert_eq!(result.n_levels, 1);
        assert_eq!(result.nonparam_groups, vec![1]);
        assert_eq!(result.regex, "(?:(\\/+foo\\/+([^\\/?#]+)\\/*))");
        assert_eq!(result.param_groups[0].get("id"), Some(&2));
    }

    #[test]
    fn test_three_members_grouping() {
        let routes = vec![
            route("a", "/a/:x"),
            route("b", "/b/:y"),
            route("c", "/c/:z"),
        ];
        let members = members_of(3);
        let refs: Vec<&RouteWithParents> = members.iter().collect();
        let result = disjoin_regexp(&routes, &refs);

        assert_eq!(result.n_levels, 2);
        // Groups in '(' order: 1 = left level group, 2 = member a,
        // 3 = a's param, 4 = member b, 5 = b's param, 6 = right level
        // group, 7 = member c, 8 = c's param.
        assert_eq!(result.nonparam_groups, vec![1, 2, 4, 6, 7]);
        assert_eq!(
            result.regex,
            "(?:((\\/+a\\/+([^\\/?#]+)\\/*)|(\\/+b\\/+([^\\/?#]+)\\/*))|((\\/+c\\/+([^\\/?#]+)\\/*)))"
        );
        assert_eq!(result.param_groups[0].get("x"), Some(&3));
        assert_eq!(result.param_groups[1].get("y"), Some(&5));
        assert_eq!(result.param_groups[2].get("z"), Some(&8));
        assert_eq!(result.names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parent_joining() {
        let mut parent = route("p", "/users");
        parent.terminal = true;
        let routes = vec![parent, route("c", ":id/home")];
        let members = vec![RouteWithParents {
            route: 1,
            parents: vec![0],
        }];
        let refs: Vec<&RouteWithParents> = members.iter().collect();
        let result = disjoin_regexp(&routes, &refs);

        assert_eq!(
            result.regex,
            "(?:(\\/+users\\/+([^\\/?#]+)\\/+home\\/*))"
        );
        assert_eq!(result.param_groups[0].get("id"), Some(&2));
    }

    #[test]
    fn test_group_balance() {
        for n in 1..24 {
            let routes: Vec<CompiledRoute> = (0..n)
                .map(|i| route(&format!("r{i}"), &format!("/p{i}/:x")))
                .collect();
            let members = members_of(n);
            let refs: Vec<&RouteWithParents> = members.iter().collect();
            let result = disjoin_regexp(&routes, &refs);

            let opens = result.regex.matches('(').count();
            let closes = result.regex.matches(')').count();
            assert_eq!(opens, closes, "unbalanced for n={n}");
            assert_eq!(result.n_levels, (n.max(2) as f64).log2().ceil() as usize);
        }
    }
}
