//! Post-optimization of the emitted constant-portion regex.
//!
//! The emitter produces disjunctions like `(A)x|(B)x|(C)x` whenever
//! sibling routes end in the same literal. Refactoring them into
//! `(A|B|C)x` lets regex engines with literal-prefix optimizations skip
//! whole alternatives. The regex is reparsed into a small AST, rewritten
//! in place, and written back; parsing and writing with no rewrite is
//! byte-identical.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReKind {
    Seq,
    Group,
    NmGroup,
    Disjunction,
}

#[derive(Debug, Clone)]
pub(crate) struct ReNode {
    kind: ReKind,
    value: String,
    children: Vec<usize>,
}

/// A parsed regex, arena-allocated. Node 0 is the root sequence.
#[derive(Debug)]
pub(crate) struct ReAst {
    nodes: Vec<ReNode>,
}

impl ReAst {
    /// Parse an emitted regex. Only the syntax the emitter produces is
    /// understood; anything else is an internal error.
    pub fn parse(re: &str) -> ReAst {
        let mut ast = ReAst {
            nodes: vec![ReNode {
                kind: ReKind::Seq,
                value: String::new(),
                children: Vec::new(),
            }],
        };

        let bytes = re.as_bytes();
        let mut current = 0usize;
        let mut current_lit_start = 0usize;
        let mut parents: Vec<usize> = Vec::new();

        let mut i = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => {
                    let pending_empty_alt = !parents.is_empty()
                        && ast.nodes[*parents.last().expect("parents non-empty")].kind
                            == ReKind::Disjunction
                        && !ast.nodes[current].children.is_empty();
                    if current_lit_start != i || pending_empty_alt {
                        ast.append_literal(current, &re[current_lit_start..i]);
                    }

                    let kind = if i + 2 < bytes.len() && &bytes[i + 1..i + 3] == b"?:" {
                        i += 2;
                        ReKind::NmGroup
                    } else {
                        ReKind::Group
                    };

                    let g = ast.push(ReNode {
                        kind,
                        value: String::new(),
                        children: Vec::new(),
                    });
                    ast.nodes[current].children.push(g);
                    let s = ast.push(ReNode {
                        kind: ReKind::Seq,
                        value: String::new(),
                        children: Vec::new(),
                    });
                    ast.nodes[g].children.push(s);
                    parents.push(current);
                    parents.push(g);
                    current = s;
                    current_lit_start = i + 1;
                }
                b')' => {
                    if current_lit_start != i {
                        ast.append_literal(current, &re[current_lit_start..i]);
                    }
                    while let Some(&top) = parents.last() {
                        if matches!(ast.nodes[top].kind, ReKind::Group | ReKind::NmGroup) {
                            break;
                        }
                        current = parents.pop().expect("parents non-empty");
                    }
                    assert!(parents.len() >= 2, "unbalanced ')' in emitted regex");
                    parents.pop();
                    current = parents.pop().expect("parents non-empty");
                    current_lit_start = i + 1;
                }
                b'|' => {
                    if ast.nodes[current].children.is_empty() || current_lit_start != i {
                        ast.append_literal(current, &re[current_lit_start..i]);
                    }
                    let in_disjunction = parents
                        .last()
                        .is_some_and(|&p| ast.nodes[p].kind == ReKind::Disjunction);
                    if in_disjunction {
                        let n = ast.push(ReNode {
                            kind: ReKind::Seq,
                            value: String::new(),
                            children: Vec::new(),
                        });
                        let p = *parents.last().expect("parents non-empty");
                        ast.nodes[p].children.push(n);
                        current = n;
                    } else {
                        // Morph the current node into a disjunction whose
                        // first alternative is a copy of what it held.
                        let copy = ast.nodes[current].clone();
                        let copy_id = ast.push(copy);
                        let new_seq = ast.push(ReNode {
                            kind: ReKind::Seq,
                            value: String::new(),
                            children: Vec::new(),
                        });
                        ast.nodes[current] = ReNode {
                            kind: ReKind::Disjunction,
                            value: String::new(),
                            children: vec![copy_id, new_seq],
                        };
                        parents.push(current);
                        current = new_seq;
                    }
                    current_lit_start = i + 1;
                }
                b'\\' => {
                    i += 1;
                    assert!(i < bytes.len(), "dangling escape in emitted regex");
                }
                _ => {}
            }
            i += 1;
        }

        if current_lit_start != i {
            ast.append_literal(current, &re[current_lit_start..]);
        }

        ast
    }

    fn push(&mut self, node: ReNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn append_literal(&mut self, parent: usize, lit: &str) {
        let n = self.push(ReNode {
            kind: ReKind::Seq,
            value: lit.to_string(),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(n);
    }

    /// Write the regex back out.
    pub fn to_regex_string(&self) -> String {
        let mut sb = String::new();
        self.write(0, &mut sb);
        sb
    }

    fn write(&self, id: usize, sb: &mut String) {
        let n = &self.nodes[id];
        sb.push_str(&n.value);
        match n.kind {
            ReKind::Seq => {
                for &c in &n.children {
                    self.write(c, sb);
                }
            }
            ReKind::Group => {
                sb.push('(');
                for &c in &n.children {
                    self.write(c, sb);
                }
                sb.push(')');
            }
            ReKind::NmGroup => {
                sb.push_str("(?:");
                for &c in &n.children {
                    self.write(c, sb);
                }
                sb.push(')');
            }
            ReKind::Disjunction => {
                for (i, &c) in n.children.iter().enumerate() {
                    if i != 0 {
                        sb.push('|');
                    }
                    self.write(c, sb);
                }
            }
        }
    }
}

/// A disjunction eligible for trailing-literal refactoring, with its
/// alternatives bucketed by trailing key (insertion order preserved).
pub(crate) struct SingleGroupDisjunct {
    node: usize,
    /// (trailing key, alternatives with that trailing)
    buckets: Vec<(Vec<u8>, Vec<usize>)>,
    /// Alternatives left untouched.
    others: Vec<usize>,
}

/// Find every disjunction with at least three alternatives of the shape
/// `(...)lit...`. Trailing literals longer than `scratch` (or of more
/// than four nodes) exempt their alternative from refactoring.
pub(crate) fn find_single_group_disjuncts(
    ast: &ReAst,
    scratch: &mut [u8],
) -> Vec<SingleGroupDisjunct> {
    let mut accum = Vec::new();
    find_rec(ast, 0, scratch, &mut accum);
    accum
}

fn find_rec(ast: &ReAst, id: usize, scratch: &mut [u8], accum: &mut Vec<SingleGroupDisjunct>) {
    let n = &ast.nodes[id];
    if n.kind == ReKind::Disjunction {
        let group_count = n
            .children
            .iter()
            .filter(|&&c| is_group_child(ast, c))
            .count();

        if group_count >= 3 {
            let mut buckets: Vec<(Vec<u8>, Vec<usize>)> = Vec::new();
            let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
            let mut others = Vec::new();

            for &c in &n.children {
                let key = if is_group_child(ast, c) {
                    trailing_key(ast, c, scratch)
                } else {
                    None
                };
                match key {
                    Some(key) => {
                        let slot = *index.entry(key.clone()).or_insert_with(|| {
                            buckets.push((key, Vec::new()));
                            buckets.len() - 1
                        });
                        buckets[slot].1.push(c);
                    }
                    None => others.push(c),
                }
            }

            accum.push(SingleGroupDisjunct {
                node: id,
                buckets,
                others,
            });
        }
    }

    for &c in &ast.nodes[id].children {
        find_rec(ast, c, scratch, accum);
    }
}

/// `(...)` followed only by literal sequence nodes.
fn is_group_child(ast: &ReAst, id: usize) -> bool {
    let n = &ast.nodes[id];
    if n.kind != ReKind::Seq || n.children.is_empty() {
        return false;
    }
    let head = &ast.nodes[n.children[0]];
    if head.kind != ReKind::Group
        || head.children.len() != 1
        || ast.nodes[head.children[0]].kind != ReKind::Seq
    {
        return false;
    }
    n.children[1..]
        .iter()
        .all(|&c| ast.nodes[c].kind == ReKind::Seq)
}

/// Serialize the trailing nodes of a group-child into the scratch
/// buffer; `None` when the trailing is too long to consider.
fn trailing_key(ast: &ReAst, id: usize, scratch: &mut [u8]) -> Option<Vec<u8>> {
    let n = &ast.nodes[id];
    if n.children.len() > 4 {
        return None;
    }

    let mut len = 0usize;
    for &c in &n.children[1..] {
        let t = &ast.nodes[c];
        if t.kind != ReKind::Seq {
            return None;
        }
        if len + 1 + t.value.len() > scratch.len() {
            return None;
        }
        scratch[len] = t.kind as u8;
        scratch[len + 1..len + 1 + t.value.len()].copy_from_slice(t.value.as_bytes());
        len += 1 + t.value.len();
    }

    Some(scratch[..len].to_vec())
}

/// Rewrite each found disjunction: alternatives sharing a trailing key
/// become one `(A|B|C)trailing` alternative; the rest stay as they are.
pub(crate) fn refactor_single_group_disjuncts(ast: &mut ReAst, sgds: Vec<SingleGroupDisjunct>) {
    for sgd in sgds {
        let mut new_children: Vec<usize> = Vec::new();

        for (_, members) in &sgd.buckets {
            // The inner sequences of each member's leading group become
            // the alternatives of one shared group.
            let inner: Vec<usize> = members
                .iter()
                .map(|&m| {
                    let head = ast.nodes[m].children[0];
                    ast.nodes[head].children[0]
                })
                .collect();
            let inner_disj = ast.push(ReNode {
                kind: ReKind::Disjunction,
                value: String::new(),
                children: inner,
            });
            let group = ast.push(ReNode {
                kind: ReKind::Group,
                value: String::new(),
                children: vec![inner_disj],
            });

            let first = members[0];
            if ast.nodes[first].children.len() == 1 {
                new_children.push(group);
            } else {
                let mut seq_children = vec![group];
                seq_children.extend_from_slice(&ast.nodes[first].children[1..]);
                let seq = ast.push(ReNode {
                    kind: ReKind::Seq,
                    value: String::new(),
                    children: seq_children,
                });
                new_children.push(seq);
            }
        }

        if !sgd.others.is_empty() {
            let leftover = ast.push(ReNode {
                kind: ReKind::Disjunction,
                value: String::new(),
                children: sgd.others.clone(),
            });
            new_children.push(leftover);
        }

        ast.nodes[sgd.node] = ReNode {
            kind: ReKind::Disjunction,
            value: String::new(),
            children: new_children,
        };
    }
}

/// Parse, refactor, and write back in one step.
pub(crate) fn optimize_regex(re: &str, scratch: &mut [u8]) -> String {
    let mut ast = ReAst::parse(re);
    let sgds = find_single_group_disjuncts(&ast, scratch);
    refactor_single_group_disjuncts(&mut ast, sgds);
    ast.to_regex_string()
}

/// Count capturing groups by scanning for unescaped `(` not followed by
/// `?:`.
pub(crate) fn count_capture_groups(re: &str) -> usize {
    let bytes = re.as_bytes();
    let mut n = 0;
    for i in 0..bytes.len() {
        if bytes[i] == b'('
            && (i == 0 || bytes[i - 1] != b'\\')
            && (i + 2 >= bytes.len() || bytes[i + 1] != b'?' || bytes[i + 2] != b':')
        {
            n += 1;
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(re: &str) -> String {
        ReAst::parse(re).to_regex_string()
    }

    fn optimized(re: &str) -> String {
        let mut scratch = vec![0u8; 64];
        optimize_regex(re, &mut scratch)
    }

    #[test]
    fn test_round_trip_is_identity() {
        for re in [
            "",
            "abc",
            "a|b",
            "(a)",
            "(?:a)",
            "(a)(b)|(c)",
            "(?:\\/+(?:(foo)\\/*|(bar)\\/*))",
            "a\\(b",
            "(a|b|)",
            "(|a)",
            "(?:(f)(?:(oo)|(oobar)))",
        ] {
            assert_eq!(round_trip(re), re, "round trip of {:?}", re);
        }
    }

    #[test]
    fn test_refactor_shared_trailing() {
        assert_eq!(optimized("(a)x|(b)x|(c)x"), "(a|b|c)x");
    }

    #[test]
    fn test_refactor_groups_without_trailing() {
        assert_eq!(optimized("(a)|(b)|(c)"), "(a|b|c)");
    }

    #[test]
    fn test_refactor_mixed_trailings() {
        assert_eq!(optimized("(a)x|(b)x|(c)y|(d)y"), "(a|b)x|(c|d)y");
    }

    #[test]
    fn test_refactor_keeps_non_group_alternatives() {
        assert_eq!(optimized("(a)x|(b)x|(c)x|zap"), "(a|b|c)x|zap");
    }

    #[test]
    fn test_no_refactor_below_three_groups() {
        assert_eq!(optimized("(a)x|(b)x"), "(a)x|(b)x");
    }

    #[test]
    fn test_no_refactor_inside_unrelated_text() {
        assert_eq!(optimized("abc(d)e"), "abc(d)e");
    }

    #[test]
    fn test_refactor_within_nested_group() {
        assert_eq!(optimized("(?:(a)x|(b)x|(c)x)"), "(?:(a|b|c)x)");
    }

    #[test]
    fn test_scratch_buffer_bound_skips_long_trailing() {
        let long = "x".repeat(100);
        let re = format!("(a){long}|(b){long}|(c){long}");
        // Trailing exceeds the scratch buffer: alternatives are left
        // alone (they all land in the untouched list).
        assert_eq!(optimized(&re), re);
    }

    #[test]
    fn test_optimization_is_idempotent() {
        let mut scratch = vec![0u8; 64];
        for re in [
            "(a)x|(b)x|(c)x",
            "(a)x|(b)x|(c)y|(d)y",
            "(?:\\/+(?:(foo)(\\/)\\/*|(bar)(\\/)\\/*|(baz)(\\/)\\/*))",
        ] {
            let once = optimize_regex(re, &mut scratch);
            let twice = optimize_regex(&once, &mut scratch);
            assert_eq!(once, twice, "idempotence of {:?}", re);
        }
    }

    #[test]
    fn test_count_capture_groups() {
        assert_eq!(count_capture_groups("(a)(b)"), 2);
        assert_eq!(count_capture_groups("(?:a)(b)"), 1);
        assert_eq!(count_capture_groups("\\((a)"), 1);
        assert_eq!(count_capture_groups(""), 0);
    }
}
