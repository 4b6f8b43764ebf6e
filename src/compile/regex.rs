//! Translation of a parsed route pattern into its match regex and
//! constant-portion regex.
//!
//! The match regex carries a capture group per parameter. The
//! constant-portion regex captures only the route's constant skeleton,
//! so that one anchored replace can map a URL to its family key. The
//! route's first constant is left out of the stored regex and re-emitted
//! on demand, because the constant-portion tree may factor a shared
//! prefix of it away (see `tree.rs`).

use std::collections::BTreeMap;

use crate::nfa::REGEXP_SPECIAL_CHARS;
use crate::routes::RouteElement;

use super::CompiledRoute;

/// Append `s` to `out` with regex specials escaped.
pub(crate) fn regex_escape(s: &str, out: &mut String) {
    for c in s.chars() {
        if REGEXP_SPECIAL_CHARS.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Compile one pattern into its regex parts. Identity fields (name,
/// line, tags, ...) are filled in by the caller.
pub(crate) fn route_to_regexps(elems: &[RouteElement]) -> CompiledRoute {
    // An initial '/' would make it a pain to join the regexes of
    // hierarchically nested routes, so it is dropped here and restored
    // by the joiners.
    let elems: &[RouteElement] = if !elems.is_empty() && elems[0].is_slash() {
        &elems[1..]
    } else {
        elems
    };

    let mut re = String::new();
    let mut cp = String::new();
    let mut constant_portion = String::new();
    let mut constish_prefix = String::new();
    let mut constish_suffix = String::new();
    let mut in_constish_prefix = true;

    let mut param_group_numbers: BTreeMap<String, usize> = BTreeMap::new();
    let mut group_i = 1usize;

    for (i, elem) in elems.iter().enumerate() {
        let is_final = i + 1 == elems.len();
        match elem {
            RouteElement::Slash => {
                if is_final {
                    continue;
                }
                re.push_str("\\/+");
                cp.push_str("(\\/)\\/*");
                constant_portion.push('/');
                if in_constish_prefix {
                    constish_prefix.push('/');
                }
                constish_suffix.push('/');
            }
            RouteElement::Constant(v) => {
                regex_escape(v, &mut re);
                constant_portion.push_str(v);

                // The first constant is re-emitted at offset time, after
                // any prefix factoring; see constant_portion_regexp.
                if i != 0 {
                    cp.push('(');
                    regex_escape(v, &mut cp);
                    cp.push(')');
                }

                if in_constish_prefix {
                    constish_prefix.push_str(v);
                }
                constish_suffix.push_str(v);
            }
            RouteElement::Parameter(p) => {
                re.push_str("([^\\/?#]+)");
                cp.push_str("[^\\/?#]+");
                param_group_numbers.insert(p.clone(), group_i);
                group_i += 1;
                in_constish_prefix = false;
                constish_suffix.clear();
            }
            RouteElement::IntegerParameter(p) => {
                re.push_str("(-?[0-9]+)");
                cp.push_str("-?[0-9]+");
                param_group_numbers.insert(p.clone(), group_i);
                group_i += 1;
                in_constish_prefix = false;
                constish_suffix.clear();
            }
            RouteElement::RestParameter(p) => {
                // A rest parameter must not match a string consisting
                // entirely of slashes; that would break the rule that
                // repeated slashes are equivalent to a single slash.
                // Non-greedy unless final.
                if is_final {
                    re.push_str("(\\/*[^\\/?#][^?#]*)");
                    cp.push_str("\\/*[^\\/?#][^?#]*");
                } else {
                    re.push_str("(\\/*[^\\/?#][^?#]*?)");
                    cp.push_str("\\/*[^\\/?#][^?#]*?");
                }
                param_group_numbers.insert(p.clone(), group_i);
                group_i += 1;
                in_constish_prefix = false;
                constish_suffix.clear();
            }
            RouteElement::SingleGlob => {
                re.push_str("[^\\/?#]+");
                cp.push_str("[^\\/?#]+");
                in_constish_prefix = false;
                constish_suffix.clear();
            }
            RouteElement::DoubleGlob => {
                let common = if is_final {
                    "([^?#]+)"
                } else {
                    "(\\/*[^\\/?#][^?#]+?)"
                };
                re.push_str(common);
                cp.push_str(common);
                group_i += 1;
                in_constish_prefix = false;
                constish_suffix.clear();
            }
            RouteElement::NoTrailingSlash => {}
        }
    }

    let first_constant = match elems.first() {
        Some(RouteElement::Constant(v)) => v.clone(),
        _ => String::new(),
    };

    CompiledRoute {
        name: String::new(),
        line: 0,
        filename: String::new(),
        elems: elems.to_vec(),
        match_regexp: re,
        cp_regex_tail: cp,
        first_constant,
        constant_portion,
        constish_prefix,
        constish_suffix,
        n_groups: group_i - 1,
        param_group_numbers,
        tags: Default::default(),
        methods: Default::default(),
        depth: 0,
        terminal: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::parse::parse_route;
    use crate::routes::Lexed;

    fn compile(pattern: &str) -> CompiledRoute {
        let elems: Vec<RouteElement> = parse_route(pattern)
            .into_iter()
            .filter_map(|le| match le.item {
                Lexed::Elem(e) => Some(e),
                Lexed::Illegal(_) => None,
            })
            .collect();
        route_to_regexps(&elems)
    }

    #[test]
    fn test_constant_route() {
        let r = compile("/foo/bar");
        assert_eq!(r.match_regexp, "foo\\/+bar");
        assert_eq!(r.constant_portion, "foo/bar");
        assert_eq!(r.constish_prefix, "foo/bar");
        assert_eq!(r.constish_suffix, "foo/bar");
        assert_eq!(r.n_groups, 0);
        assert_eq!(r.constant_portion_regexp(0), "(foo)(\\/)\\/*(bar)");
    }

    #[test]
    fn test_parameter_route() {
        let r = compile("/users/:user_id/home");
        assert_eq!(r.match_regexp, "users\\/+([^\\/?#]+)\\/+home");
        assert_eq!(r.constant_portion, "users//home");
        assert_eq!(r.constish_prefix, "users/");
        assert_eq!(r.constish_suffix, "/home");
        assert_eq!(r.n_groups, 1);
        assert_eq!(r.param_group_numbers.get("user_id"), Some(&1));
        assert_eq!(
            r.constant_portion_regexp(0),
            "(users)(\\/)\\/*[^\\/?#]+(\\/)\\/*(home)"
        );
    }

    #[test]
    fn test_integer_parameter() {
        let r = compile("/foo/:#n");
        assert_eq!(r.match_regexp, "foo\\/+(-?[0-9]+)");
        assert_eq!(r.constant_portion_regexp(0), "(foo)(\\/)\\/*-?[0-9]+");
    }

    #[test]
    fn test_rest_parameter_greediness() {
        let final_rest = compile("/x/:**rest");
        assert_eq!(final_rest.match_regexp, "x\\/+(\\/*[^\\/?#][^?#]*)");

        let inner_rest = compile("/x/:**rest/more");
        assert_eq!(
            inner_rest.match_regexp,
            "x\\/+(\\/*[^\\/?#][^?#]*?)\\/+more"
        );
    }

    #[test]
    fn test_globs() {
        let single = compile("/a/*");
        assert_eq!(single.match_regexp, "a\\/+[^\\/?#]+");
        assert_eq!(single.n_groups, 0);

        let double = compile("/a/**");
        assert_eq!(double.match_regexp, "a\\/+([^?#]+)");
        assert_eq!(double.n_groups, 1);
        assert!(double.param_group_numbers.is_empty());
    }

    #[test]
    fn test_left_offset_emission() {
        let r = compile("/foobar/:id");
        assert_eq!(
            r.constant_portion_regexp(3),
            "(bar)(\\/)\\/*[^\\/?#]+"
        );
        assert_eq!(r.constant_portion_regexp(6), "(\\/)\\/*[^\\/?#]+");
    }

    #[test]
    fn test_trailing_slash_forms() {
        let trail = compile("/foo/");
        assert_eq!(trail.constant_portion, "foo/");
        assert_eq!(trail.route_term(), "\\/+");

        let no_trail = compile("/foo!/");
        assert_eq!(no_trail.route_term(), "");

        let plain = compile("/foo");
        assert_eq!(plain.route_term(), "\\/*");

        let just_slash = compile("/");
        assert!(just_slash.is_just_slash());
        assert_eq!(just_slash.route_term(), "\\/*");
    }

    #[test]
    fn test_regex_escape() {
        let mut out = String::new();
        regex_escape("a.b*c/d", &mut out);
        assert_eq!(out, "a\\.b\\*c\\/d");
    }
}
