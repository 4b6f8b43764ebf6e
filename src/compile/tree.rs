//! The constant-portion tree and its regex emission.
//!
//! Routes are arranged into a tree mirroring their nesting, siblings are
//! ordered by their (offset-adjusted) first constant, and nodes whose
//! children share a first character get that character factored into a
//! synthetic node. The tree is then walked to emit one composite
//! constant-portion regex whose capture groups spell out the family key
//! of whichever route matched.
//!
//! Nodes live in an arena and child slots may be `None` after the
//! factoring pass; every traversal tolerates missing children.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::filter::TagExpr;

use super::regex::regex_escape;
use super::{matching_methods, CompiledRoute, RouteWithParents};

pub(crate) type CpNodeId = usize;

#[derive(Debug, Clone, Copy)]
pub(crate) enum CpPayload {
    Root,
    Route { route: usize, left_offset: usize },
    Factor(char),
}

#[derive(Debug)]
pub(crate) struct CpNode {
    pub payload: CpPayload,
    pub excluded: bool,
    pub children: Vec<Option<CpNodeId>>,
}

#[derive(Debug)]
pub(crate) struct CpTree {
    nodes: Vec<CpNode>,
}

impl CpTree {
    pub fn root(&self) -> CpNodeId {
        0
    }

    pub fn node(&self, id: CpNodeId) -> &CpNode {
        &self.nodes[id]
    }

    fn node_mut(&mut self, id: CpNodeId) -> &mut CpNode {
        &mut self.nodes[id]
    }

    fn push(&mut self, node: CpNode) -> CpNodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

fn route_node(route: usize) -> CpNode {
    CpNode {
        payload: CpPayload::Route {
            route,
            left_offset: 0,
        },
        excluded: false,
        children: Vec::new(),
    }
}

/// Arrange routes (already in file order, with depths) into a tree.
pub(crate) fn build_constant_portion_tree(routes: &[CompiledRoute]) -> CpTree {
    let mut tree = CpTree {
        nodes: vec![CpNode {
            payload: CpPayload::Root,
            excluded: false,
            children: Vec::new(),
        }],
    };

    let mut current_parent = tree.root();
    let mut parents: Vec<CpNodeId> = vec![current_parent];
    let mut last_level = 0usize;

    for (i, r) in routes.iter().enumerate() {
        if r.depth > last_level {
            let last_child = tree
                .node(current_parent)
                .children
                .last()
                .copied()
                .flatten()
                .expect("deeper route without a preceding sibling");
            parents.push(last_child);
            current_parent = last_child;
        } else if r.depth < last_level {
            let mut li = parents.len() - 1;
            while li >= 1 {
                let parent_depth = match tree.node(parents[li]).payload {
                    CpPayload::Route { route, .. } => routes[route].depth,
                    _ => break,
                };
                if r.depth > parent_depth {
                    break;
                }
                li -= 1;
            }
            current_parent = parents[li];
            parents.truncate(li + 1);
        }

        let id = tree.push(route_node(i));
        tree.node_mut(current_parent).children.push(Some(id));
        last_level = r.depth;
    }

    tree
}

/// Apply a `--filter` expression: routes it rejects are demoted to
/// non-terminal (they still shape their descendants' patterns), and
/// wholly rejected subtrees are pruned.
pub(crate) fn filter_tree(tree: &mut CpTree, routes: &mut [CompiledRoute], expr: &TagExpr) {
    fn mark(
        tree: &mut CpTree,
        routes: &mut [CompiledRoute],
        expr: &TagExpr,
        id: CpNodeId,
        inherited_tags: &BTreeSet<String>,
    ) {
        let child_ids: Vec<CpNodeId> = tree.node(id).children.iter().copied().flatten().collect();
        let mut retained: Vec<Option<CpNodeId>> = Vec::new();

        for c in child_ids {
            let route_idx = match tree.node(c).payload {
                CpPayload::Route { route, .. } => route,
                _ => {
                    retained.push(Some(c));
                    continue;
                }
            };

            let mut tags = inherited_tags.clone();
            tags.extend(routes[route_idx].tags.iter().cloned());

            let included =
                !matching_methods(Some(expr), &routes[route_idx].methods, &tags).is_empty();
            if included {
                retained.push(Some(c));
            } else {
                tree.node_mut(c).excluded = true;
                // Ensure the route does not appear in the output.
                routes[route_idx].terminal = false;
                if !tree.node(c).children.is_empty() {
                    retained.push(Some(c));
                }
            }

            mark(tree, routes, expr, c, &tags);
        }

        tree.node_mut(id).children = retained;
    }

    fn prune(tree: &mut CpTree, id: CpNodeId) -> bool {
        let child_ids: Vec<CpNodeId> = tree.node(id).children.iter().copied().flatten().collect();
        let mut retained = Vec::new();
        let mut all_excluded = true;
        for c in child_ids {
            if !prune(tree, c) {
                all_excluded = false;
                retained.push(Some(c));
            }
        }
        tree.node_mut(id).children = retained;
        tree.node(id).excluded && all_excluded
    }

    let root = tree.root();
    mark(tree, routes, expr, root, &BTreeSet::new());
    prune(tree, root);
}

/// Order siblings deterministically and factor shared first characters.
///
/// A node with at least three distinct first characters among its
/// children gets, for each character shared by two or more children, a
/// synthetic node capturing that character; the grouped children's
/// left offsets advance past it. Vacated sibling slots become `None`.
pub(crate) fn optimize_tree(tree: &mut CpTree, routes: &[CompiledRoute]) {
    optimize_node(tree, routes, tree.root());
}

fn sibling_sort_key(tree: &CpTree, routes: &[CompiledRoute], id: CpNodeId) -> String {
    match tree.node(id).payload {
        CpPayload::Route { route, left_offset } => {
            let fc = &routes[route].first_constant;
            fc.get(left_offset..).unwrap_or("").to_string()
        }
        _ => String::new(),
    }
}

fn optimize_node(tree: &mut CpTree, routes: &[CompiledRoute], id: CpNodeId) {
    if tree.node(id).children.is_empty() {
        return;
    }

    let mut children = std::mem::take(&mut tree.node_mut(id).children);
    children.sort_by(|a, b| {
        let ka = a.map_or(String::new(), |n| sibling_sort_key(tree, routes, n));
        let kb = b.map_or(String::new(), |n| sibling_sort_key(tree, routes, n));
        ka.cmp(&kb)
    });

    // First characters are contiguous after the sort.
    let mut none_count = 0usize;
    let mut ranges: BTreeMap<char, (usize, usize)> = BTreeMap::new();
    for (i, child) in children.iter().enumerate() {
        let fc = child.and_then(|c| match tree.node(c).payload {
            CpPayload::Route { route, left_offset } => routes[route].first_char(left_offset),
            _ => None,
        });
        match fc {
            None => none_count += 1,
            Some(fc) => {
                let range = ranges.entry(fc).or_insert((i, i));
                range.1 = i + 1;
            }
        }
    }

    let distinct = ranges.len() + usize::from(none_count > 0);
    if distinct >= 3 {
        for (&fc, &(si, ei)) in &ranges {
            if ei - si < 2 {
                continue;
            }

            let grouped: Vec<Option<CpNodeId>> =
                children[si..ei].iter_mut().map(std::mem::take).collect();
            for c in grouped.iter().copied().flatten() {
                if let CpPayload::Route { left_offset, .. } = &mut tree.node_mut(c).payload {
                    *left_offset += fc.len_utf8();
                }
            }
            let factor = tree.push(CpNode {
                payload: CpPayload::Factor(fc),
                excluded: false,
                children: grouped,
            });
            children[si] = Some(factor);
        }
    }

    tree.node_mut(id).children = children;

    let child_ids: Vec<CpNodeId> = tree.node(id).children.iter().copied().flatten().collect();
    for c in child_ids {
        optimize_node(tree, routes, c);
    }
}

/// Emit the composite constant-portion regex for the whole tree.
pub(crate) fn constant_portion_regexp_of_tree(tree: &CpTree, routes: &[CompiledRoute]) -> String {
    let mut sb = String::from("(?:\\/+(?:");

    let mut first = true;
    for c in tree.node(tree.root()).children.iter().copied().flatten() {
        if !first {
            sb.push('|');
        }
        emit_node(tree, routes, c, true, &mut sb);
        first = false;
    }

    sb.push_str("))");
    sb
}

/// The shared trailing term of a node's children, when every child is a
/// terminal leaf route (and not a bare slash) with the same term.
fn liftable_term(
    tree: &CpTree,
    routes: &[CompiledRoute],
    node: &CpNode,
) -> Option<&'static str> {
    let mut common: Option<&'static str> = None;
    if node.children.is_empty() {
        return None;
    }
    for c in node.children.iter().copied().flatten() {
        let cn = tree.node(c);
        let CpPayload::Route { route, .. } = cn.payload else {
            return None;
        };
        let r = &routes[route];
        if !cn.children.is_empty() || !r.terminal || r.is_just_slash() {
            return None;
        }
        let term = r.route_term();
        match common {
            None => common = Some(term),
            Some(t) if t == term => {}
            Some(_) => return None,
        }
    }
    common
}

fn emit_node(
    tree: &CpTree,
    routes: &[CompiledRoute],
    id: CpNodeId,
    add_term: bool,
    sb: &mut String,
) {
    let n = tree.node(id);

    // Children sharing one trailing term get it factored out of their
    // disjunction; a terminal interior node keeps its own term
    // alternative regardless.
    let lifted = if add_term {
        liftable_term(tree, routes, n)
    } else {
        None
    };
    let child_add_term = add_term && lifted.is_none();

    let emit_children = |sb: &mut String| {
        let mut first = true;
        for c in n.children.iter().copied().flatten() {
            if !first {
                sb.push('|');
            }
            emit_node(tree, routes, c, child_add_term, sb);
            first = false;
        }
    };

    match n.payload {
        CpPayload::Factor(fc) => {
            sb.push_str("(?:(");
            regex_escape(&fc.to_string(), sb);
            sb.push_str(")(?:");
            emit_children(sb);
            sb.push(')');
            if let Some(term) = lifted {
                sb.push_str(term);
            }
            sb.push(')');
        }
        CpPayload::Route { route, left_offset } => {
            let r = &routes[route];
            sb.push_str(&r.constant_portion_regexp(left_offset));
            if n.children.is_empty() {
                if r.terminal && add_term {
                    sb.push_str(r.route_term());
                }
            } else {
                sb.push_str("(?:");
                if r.terminal && add_term {
                    sb.push_str(r.route_term());
                    sb.push('|');
                }
                if !r.is_just_slash() {
                    sb.push_str("(\\/)\\/*");
                }
                sb.push_str("(?:");
                emit_children(sb);
                sb.push(')');
                if let Some(term) = lifted {
                    sb.push_str(term);
                }
                sb.push(')');
            }
        }
        CpPayload::Root => {
            // The root is emitted by constant_portion_regexp_of_tree.
            emit_children(sb);
        }
    }
}

/// Group the tree's routes into families keyed by their full constant
/// portion (ancestors included), sorted by key.
pub(crate) fn families_by_constant_portion(
    tree: &CpTree,
    routes: &[CompiledRoute],
) -> Vec<(String, Vec<RouteWithParents>)> {
    let mut families: BTreeMap<String, Vec<RouteWithParents>> = BTreeMap::new();

    fn rec(
        tree: &CpTree,
        routes: &[CompiledRoute],
        id: CpNodeId,
        parents: &mut Vec<usize>,
        families: &mut BTreeMap<String, Vec<RouteWithParents>>,
    ) {
        let n = tree.node(id);
        let route_idx = match n.payload {
            CpPayload::Route { route, .. } => Some(route),
            _ => None,
        };

        if let Some(route) = route_idx {
            let mut cp = String::new();
            for (i, &p) in parents.iter().enumerate() {
                if i != 0 && !routes[parents[i - 1]].is_just_slash() {
                    cp.push('/');
                }
                cp.push_str(&routes[p].constant_portion);
            }
            if let Some(&last) = parents.last() {
                if !routes[last].is_just_slash() {
                    cp.push('/');
                }
            }
            cp.push_str(&routes[route].constant_portion);

            families.entry(cp).or_default().push(RouteWithParents {
                route,
                parents: parents.clone(),
            });
        }

        for c in n.children.iter().copied().flatten() {
            if let Some(route) = route_idx {
                parents.push(route);
                rec(tree, routes, c, parents, families);
                parents.pop();
            } else {
                rec(tree, routes, c, parents, families);
            }
        }
    }

    let mut parents = Vec::new();
    rec(tree, routes, tree.root(), &mut parents, &mut families);

    families.into_iter().collect()
}
