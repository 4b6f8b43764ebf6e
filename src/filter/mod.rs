//! The `--filter` tag-expression mini-language.
//!
//! Grammar: `expr := term (('&'|'|') term)*`,
//! `term := '!' term | '(' expr ')' | atom`,
//! `atom := tagGlob | '[' methodGlob ']'`.
//! Operators are left-associative with equal precedence. Globs use `*`
//! (escape with `\*`). A tag atom tests the route's tag set (its own
//! plus every ancestor's); a `[METHOD]` atom tests its method set.

pub mod glob;

use std::collections::BTreeSet;

use thiserror::Error;

use self::glob::{glob as glob_match, is_non_literal};

/// A parse error with a 1-based position within the expression.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{line}:{col}: {message}")]
pub struct TagExprError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
    LiteralTag(String),
    LiteralMethod(String),
    GlobTag(String),
    GlobMethod(String),
}

impl TagExpr {
    /// Parse a filter expression. An expression containing nothing but
    /// whitespace parses to `None` (match everything).
    pub fn parse(input: &str) -> Result<Option<TagExpr>, TagExprError> {
        let (expr, rest) = parse_expr(input).map_err(|e| located(input, e))?;
        let rest = skip_space(rest);
        if !rest.is_empty() {
            let (line, col) = line_col(input, input.len());
            return Err(TagExprError {
                line,
                col,
                message: format!("trailing input: '{rest}'"),
            });
        }
        Ok(expr)
    }

    /// Evaluate against a route's tag and method sets.
    pub fn eval(&self, tags: &BTreeSet<String>, methods: &BTreeSet<String>) -> bool {
        match self {
            TagExpr::LiteralTag(t) => tags.contains(t),
            TagExpr::LiteralMethod(m) => methods.contains(m),
            TagExpr::GlobTag(pattern) => tags.iter().any(|t| glob_match(pattern, t)),
            TagExpr::GlobMethod(pattern) => methods.iter().any(|m| glob_match(pattern, m)),
            TagExpr::And(a, b) => a.eval(tags, methods) && b.eval(tags, methods),
            TagExpr::Or(a, b) => a.eval(tags, methods) || b.eval(tags, methods),
            TagExpr::Not(e) => !e.eval(tags, methods),
        }
    }
}

/// An error before position resolution: the unconsumed input marks
/// where it happened.
struct RawError<'a> {
    rest: &'a str,
    message: String,
}

fn located(input: &str, e: RawError<'_>) -> TagExprError {
    let offset = input.len() - e.rest.len();
    let (line, col) = line_col(input, offset);
    TagExprError {
        line,
        col,
        message: e.message,
    }
}

fn line_col(input: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 0;
    for r in input[..offset.min(input.len())].chars() {
        if r == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn parse_expr(input: &str) -> Result<(Option<TagExpr>, &str), RawError<'_>> {
    let mut rest = skip_space(input);

    let (first, r) = parse_term(rest)?;
    rest = r;
    let Some(mut expr) = first else {
        return Ok((None, rest));
    };

    loop {
        rest = skip_space(rest);
        let Some(op) = rest.chars().next() else {
            break;
        };
        if op == ')' {
            break;
        }

        rest = skip_space(&rest[op.len_utf8()..]);

        match op {
            '&' => {
                let (term, r) = parse_term(rest)?;
                rest = r;
                let Some(term) = term else {
                    return Err(RawError {
                        rest,
                        message: "trailing '&'".to_string(),
                    });
                };
                expr = TagExpr::And(Box::new(expr), Box::new(term));
            }
            '|' => {
                let (term, r) = parse_term(rest)?;
                rest = r;
                let Some(term) = term else {
                    return Err(RawError {
                        rest,
                        message: "trailing '|'".to_string(),
                    });
                };
                expr = TagExpr::Or(Box::new(expr), Box::new(term));
            }
            _ => {
                return Err(RawError {
                    rest,
                    message: format!("unexpected character '{op}'"),
                });
            }
        }
    }

    Ok((Some(expr), rest))
}

fn parse_term(input: &str) -> Result<(Option<TagExpr>, &str), RawError<'_>> {
    // Consecutive '!'s cancel pairwise.
    let mut bangs = 0usize;
    let mut rest = input;
    loop {
        rest = skip_space(rest);
        if let Some(r) = rest.strip_prefix('!') {
            bangs += 1;
            rest = r;
        } else {
            break;
        }
    }

    let (expr, rest) = parse_atom(rest)?;
    if bangs % 2 == 1 {
        let Some(expr) = expr else {
            return Err(RawError {
                rest,
                message: "trailing '!'".to_string(),
            });
        };
        return Ok((Some(TagExpr::Not(Box::new(expr))), rest));
    }
    Ok((expr, rest))
}

fn parse_atom(input: &str) -> Result<(Option<TagExpr>, &str), RawError<'_>> {
    let mut rest = input;
    let Some(r) = rest.chars().next() else {
        return Ok((None, rest));
    };

    if r == ')' {
        return Ok((None, rest));
    }

    if r == '(' {
        rest = skip_space(&rest[1..]);
        let (expr, r2) = parse_expr(rest)?;
        rest = skip_space(r2);
        let Some(stripped) = rest.strip_prefix(')') else {
            return Err(RawError {
                rest,
                message: "no closing ')' found".to_string(),
            });
        };
        return Ok((expr, stripped));
    }

    let is_method = r == '[';
    if is_method {
        rest = skip_space(&rest[1..]);
    }

    let mut atom = String::new();
    loop {
        let Some(r) = rest.chars().next() else {
            break;
        };
        if is_method {
            if r == ']' {
                break;
            }
        } else if matches!(r, '&' | '|' | '!' | '(' | ')' | '[' | ']') || r.is_whitespace() {
            break;
        }

        if r == '\\' {
            match rest[1..].chars().next() {
                None => {
                    atom.push('\\');
                    rest = &rest[1..];
                }
                // Keep '\*' escaped so the glob matcher sees a literal.
                Some('*') => {
                    atom.push_str("\\*");
                    rest = &rest[1 + '*'.len_utf8()..];
                }
                Some(e) => {
                    atom.push(e);
                    rest = &rest[1 + e.len_utf8()..];
                }
            }
        } else {
            atom.push(r);
            rest = &rest[r.len_utf8()..];
        }
    }

    if is_method {
        rest = skip_space(rest);
        let Some(stripped) = rest.strip_prefix(']') else {
            return Err(RawError {
                rest,
                message: "missing closing ']' for method".to_string(),
            });
        };
        rest = stripped;
    }

    if atom.is_empty() {
        return Ok((None, rest));
    }

    let expr = if is_method {
        let name = atom.trim().to_uppercase();
        if is_non_literal(&name) {
            TagExpr::GlobMethod(name)
        } else {
            TagExpr::LiteralMethod(name)
        }
    } else if is_non_literal(&atom) {
        TagExpr::GlobTag(atom)
    } else {
        TagExpr::LiteralTag(atom)
    };
    Ok((Some(expr), rest))
}

fn skip_space(input: &str) -> &str {
    input.trim_start()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn eval(expr: &str, route_tags: &[&str], methods: &[&str]) -> bool {
        let parsed = TagExpr::parse(expr)
            .expect("expression should parse")
            .expect("expression should be non-empty");
        parsed.eval(&tags(route_tags), &tags(methods))
    }

    #[test]
    fn test_empty_expression() {
        assert_eq!(TagExpr::parse("").unwrap(), None);
        assert_eq!(TagExpr::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_literal_tag() {
        assert!(eval("foo", &["foo"], &[]));
        assert!(!eval("foo", &["bar"], &[]));
    }

    #[test]
    fn test_glob_tag() {
        assert!(eval("api-*", &["api-v2"], &[]));
        assert!(!eval("api-*", &["internal"], &[]));
        assert!(eval("a\\*b", &["a*b"], &[]));
        assert!(!eval("a\\*b", &["axb"], &[]));
    }

    #[test]
    fn test_method_atom() {
        assert!(eval("[GET]", &[], &["GET"]));
        assert!(eval("[get]", &[], &["GET"]));
        assert!(!eval("[POST]", &[], &["GET"]));
        assert!(eval("[ put ]", &[], &["PUT"]));
        assert!(eval("[P*]", &[], &["POST"]));
    }

    #[test]
    fn test_negation() {
        assert!(eval("!foo", &["bar"], &[]));
        assert!(!eval("!foo", &["foo"], &[]));
        assert!(eval("!!foo", &["foo"], &[]));
        assert!(!eval("!!!foo", &["foo"], &[]));
    }

    #[test]
    fn test_conjunction_disjunction() {
        assert!(eval("a & b", &["a", "b"], &[]));
        assert!(!eval("a & b", &["a"], &[]));
        assert!(eval("a | b", &["b"], &[]));
        assert!(!eval("a | b", &["c"], &[]));
        // Left-associative, no precedence: (a | b) & c
        assert!(!eval("a | b & c", &["a"], &[]));
        assert!(eval("a | b & c", &["a", "c"], &[]));
    }

    #[test]
    fn test_parentheses() {
        assert!(eval("a & (b | c)", &["a", "c"], &[]));
        assert!(!eval("a & (b | c)", &["a"], &[]));
        assert!(eval("!(a | b)", &["c"], &[]));
    }

    #[test]
    fn test_tags_and_methods_combined() {
        assert!(eval("api & [GET]", &["api"], &["GET"]));
        assert!(!eval("api & [GET]", &["api"], &["POST"]));
        assert!(eval("api & ![DELETE]", &["api"], &["GET"]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(TagExpr::parse("a &").is_err());
        assert!(TagExpr::parse("(a").is_err());
        assert!(TagExpr::parse("[GET").is_err());
        assert!(TagExpr::parse("!").is_err());
        assert!(TagExpr::parse("a ? b").is_err());
    }

    #[test]
    fn test_error_position() {
        let err = TagExpr::parse("a &").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("trailing '&'"));
    }
}
