//! Overlap detection between two NFAs.
//!
//! Walks the product automaton lazily, looking for a reachable state in
//! which both components accept. General regex overlap has no clever
//! shortcut, so the compiler bounds the work upstream by only comparing
//! routes that share a constant affix (see `compile::affix`); within a
//! group the check is brute-force pairwise.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Mutex;

use rayon::prelude::*;

use super::{Nfa, NodeId};

/// Decide whether the two NFAs accept at least one common string.
pub fn overlap(a: &Nfa, b: &Nfa) -> bool {
    // Memoization is restricted to states with a back-reachable
    // component: those are the only states that can be revisited via a
    // cycle, so everything else is transient and need not be remembered.
    let mut visited: HashSet<(NodeId, NodeId)> = HashSet::new();

    let mut states = vec![(a.start(), b.start())];
    let mut new_states: Vec<(NodeId, NodeId)> = Vec::new();

    loop {
        for &(s1, s2) in &states {
            let mut add_state = |visited: &mut HashSet<(NodeId, NodeId)>,
                                 new_states: &mut Vec<(NodeId, NodeId)>,
                                 st: (NodeId, NodeId)| {
                if a.node(st.0).back_reachable || b.node(st.1).back_reachable {
                    if visited.insert(st) {
                        new_states.push(st);
                    }
                } else {
                    new_states.push(st);
                }
            };

            // Walk to ε-accessible states that can consume a byte or are
            // terminal; intermediate pure-ε states are never enqueued.
            let found_term = epsilon_step(a, s1, &mut |e1| {
                epsilon_step(b, s2, &mut |e2| {
                    let n1 = a.node(e1);
                    let n2 = b.node(e2);
                    if n1.is_terminal() && n2.is_terminal() {
                        return ControlFlow::Break(());
                    }

                    if (e1, e2) != (s1, s2) {
                        // Dropping dead successors here is redundant with
                        // the step below, but keeps the state list small.
                        if !(n1.epsilons.is_empty()
                            && n2.epsilons.is_empty()
                            && !n1.mask.intersects(&n2.mask))
                        {
                            add_state(&mut visited, &mut new_states, (e1, e2));
                        }
                    }

                    ControlFlow::Continue(())
                })
            })
            .is_break();
            if found_term {
                return true;
            }

            let n1 = a.node(s1);
            let n2 = b.node(s2);
            if n1.mask.intersects(&n2.mask) {
                if let (Some(x1), Some(x2)) = (n1.next, n2.next) {
                    add_state(&mut visited, &mut new_states, (x1, x2));
                }
            }
        }

        if new_states.is_empty() {
            return false;
        }

        std::mem::swap(&mut states, &mut new_states);
        new_states.clear();
    }
}

/// Invoke `f` for every ε-reachable node (including `id` itself) that
/// either consumes a byte or is terminal.
fn epsilon_step(
    nfa: &Nfa,
    id: NodeId,
    f: &mut dyn FnMut(NodeId) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let mut seen = HashSet::new();
    epsilon_step_rec(nfa, id, f, &mut seen)
}

fn epsilon_step_rec(
    nfa: &Nfa,
    id: NodeId,
    f: &mut dyn FnMut(NodeId) -> ControlFlow<()>,
    seen: &mut HashSet<NodeId>,
) -> ControlFlow<()> {
    if !seen.insert(id) {
        return ControlFlow::Continue(());
    }
    let n = nfa.node(id);
    if n.has_progression() || n.is_terminal() {
        f(id)?;
    }
    for &e in &n.epsilons {
        epsilon_step_rec(nfa, e, f, seen)?;
    }
    ControlFlow::Continue(())
}

/// Check all unordered pairs of NFAs for overlap, in parallel.
///
/// Returns the overlapping index pairs, sorted. The output vector is the
/// only shared mutable state; its mutex is taken only on the rare
/// found-overlap path.
pub fn find_overlaps(nfas: &[Nfa]) -> Vec<(usize, usize)> {
    let found: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());

    (0..nfas.len()).into_par_iter().for_each(|i| {
        for j in i + 1..nfas.len() {
            if overlap(&nfas[i], &nfas[j]) {
                found
                    .lock()
                    .expect("overlap result lock poisoned")
                    .push((i, j));
            }
        }
    });

    let mut found = found.into_inner().expect("overlap result lock poisoned");
    found.sort_unstable();
    found
}
