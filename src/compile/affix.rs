//! Affix-based route grouping.
//!
//! Two regexes can only overlap if one's language extends the other's,
//! so routes that share no constant prefix or suffix never need a
//! pairwise overlap check. Routes are bucketed with a byte trie over
//! their constant-ish prefixes, then each bucket is split again by
//! constant-ish suffix. The resulting groups are pairwise-checkable
//! independently; anything outside a route's group is guaranteed not to
//! overlap it.

use std::collections::BTreeMap;

use super::{CompiledRoute, RouteWithParents};

#[derive(Debug)]
struct TrieNode<A> {
    children: BTreeMap<u8, TrieNode<A>>,
    assocs: Vec<A>,
    is_word: bool,
}

impl<A> Default for TrieNode<A> {
    fn default() -> Self {
        TrieNode {
            children: BTreeMap::new(),
            assocs: Vec::new(),
            is_word: false,
        }
    }
}

impl<A: Clone> TrieNode<A> {
    fn add(&mut self, s: &[u8], assoc: A) {
        if s.is_empty() {
            self.is_word = true;
        }
        let mut node = self;
        for (i, &b) in s.iter().enumerate() {
            let child = node.children.entry(b).or_default();
            child.is_word = child.is_word || i + 1 == s.len();
            node = child;
        }
        node.assocs.push(assoc);
    }

    /// All payloads at or below word nodes of this subtree, children in
    /// byte order.
    fn words(&self, accum: &mut Vec<A>) {
        if self.is_word {
            accum.extend(self.assocs.iter().cloned());
        }
        for child in self.children.values() {
            child.words(accum);
        }
    }

    /// Partition payloads by stopping point: the first word node on each
    /// root-to-leaf walk collects its whole subtree into one group.
    /// Payloads at the root (empty affix) join every group.
    fn stopping_points(&self) -> Vec<Vec<A>> {
        let mut accum = Vec::new();
        for child in self.children.values() {
            child.stopping_points_helper(&mut accum);
        }

        if self.is_word {
            if accum.is_empty() {
                accum.push(Vec::new());
            }
            for group in &mut accum {
                group.extend(self.assocs.iter().cloned());
            }
        }

        accum
    }

    fn stopping_points_helper(&self, accum: &mut Vec<Vec<A>>) {
        if self.is_word {
            let mut group = Vec::new();
            self.words(&mut group);
            accum.push(group);
            return;
        }
        for child in self.children.values() {
            child.stopping_points_helper(accum);
        }
    }
}

/// Split routes into groups that are guaranteed not to overlap across
/// group boundaries: first by constant-ish prefix, then by constant-ish
/// suffix within each prefix group.
pub(crate) fn group_routes(
    routes: &[CompiledRoute],
    rwps: &[RouteWithParents],
) -> Vec<Vec<RouteWithParents>> {
    let by_prefix = group_by_affix(routes, rwps, constish_prefix_of);
    let mut out = Vec::new();
    for group in by_prefix {
        out.extend(group_by_affix(routes, &group, constish_suffix_of));
    }
    out
}

fn group_by_affix(
    routes: &[CompiledRoute],
    rwps: &[RouteWithParents],
    affix: fn(&[CompiledRoute], &RouteWithParents) -> Vec<u8>,
) -> Vec<Vec<RouteWithParents>> {
    let mut trie: TrieNode<RouteWithParents> = TrieNode::default();

    for rwp in rwps {
        if !routes[rwp.route].terminal {
            continue;
        }
        let group_key = affix(routes, rwp);
        trie.add(&group_key, rwp.clone());
    }

    trie.stopping_points()
}

/// The constant text (parents included) leading up to the route's first
/// variable element, with slash runs collapsed.
pub(crate) fn constish_prefix_of(routes: &[CompiledRoute], rwp: &RouteWithParents) -> Vec<u8> {
    let mut pref = AffixWriter::default();
    for &p in &rwp.parents {
        pref.push_byte(b'/');
        pref.push_str(&routes[p].constish_prefix);
        if !routes[p].all_const() {
            return remove_trailing_slash(pref.into_bytes());
        }
    }

    pref.push_byte(b'/');
    pref.push_str(&routes[rwp.route].constish_prefix);
    remove_trailing_slash(pref.into_bytes())
}

/// The reversed constant trailing text of the route (walking up through
/// parents while they are fully constant), with slash runs collapsed.
/// Reversed so that shared suffixes become shared trie prefixes; the
/// result is a raw byte key (reversal can split multi-byte chars) and is
/// never shown to anyone.
pub(crate) fn constish_suffix_of(routes: &[CompiledRoute], rwp: &RouteWithParents) -> Vec<u8> {
    let r = &routes[rwp.route];
    let mut suff = AffixWriter::default();
    for &b in r.constish_suffix.as_bytes().iter().rev() {
        suff.push_byte(b);
    }
    if r.all_const() {
        suff.push_byte(b'/');
        for &p in rwp.parents.iter().rev() {
            let parent = &routes[p];
            for &b in parent.constish_suffix.as_bytes().iter().rev() {
                suff.push_byte(b);
            }
            suff.push_byte(b'/');
            if !parent.all_const() {
                break;
            }
        }
    }

    remove_trailing_slash(suff.into_bytes())
}

/// Accumulates affix bytes, dropping leading slashes and truncating at a
/// repeated slash.
#[derive(Default)]
struct AffixWriter {
    buf: Vec<u8>,
    last_was_slash: bool,
}

impl AffixWriter {
    fn push_byte(&mut self, b: u8) {
        if b == b'/' && (self.last_was_slash || self.buf.is_empty()) {
            return;
        }
        self.buf.push(b);
        self.last_was_slash = b == b'/';
    }

    fn push_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            if b == b'/' && (self.last_was_slash || self.buf.is_empty()) {
                return;
            }
            self.buf.push(b);
            self.last_was_slash = b == b'/';
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn remove_trailing_slash(mut key: Vec<u8>) -> Vec<u8> {
    if key.len() > 1 && key.last() == Some(&b'/') {
        key.pop();
    }
    key
}
