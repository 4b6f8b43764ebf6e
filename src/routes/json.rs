//! The JSON route-file grammar.
//!
//! An array whose elements are route objects or nested sub-arrays (each
//! level of array nesting is one level of route nesting). Route objects
//! have `name` and `pattern` (required), `terminal` (default true),
//! `tags` and `methods` (arrays of strings). Pattern elements are plain
//! strings (a constant, `"/"`, or `"!/"`) or two-element arrays headed by
//! `"*"`, `"**"`, `":"` or `":**"`.
//!
//! serde_json values carry no source positions, so entries are numbered
//! by order of appearance and errors refer to those sequence numbers;
//! JSON syntax errors keep serde_json's line and column.

use std::collections::BTreeSet;

use serde_json::Value;

use super::error::{RouteError, RouteErrorKind};
use super::{validate_route_elems, CasePolicy, Lexed, LexedElem, RouteElement, RouteFileEntry};

/// Parse a JSON route file. Structural errors abort the file.
pub fn parse_json_route_file(
    text: &str,
    case_policy: CasePolicy,
) -> (Vec<RouteFileEntry>, Vec<RouteError>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            errors.push(
                RouteError::new(
                    RouteErrorKind::InvalidJsonInJsonRouteFile(e.to_string()),
                    e.line(),
                )
                .with_col(e.column()),
            );
            return (entries, errors);
        }
    };

    let Value::Array(items) = value else {
        errors.push(RouteError::new(
            RouteErrorKind::ExpectedJsonRoutesToBeArray,
            0,
        ));
        return (entries, errors);
    };

    let mut seq = 0usize;
    parse_level(
        &items,
        0,
        case_policy,
        &mut seq,
        &mut entries,
        &mut errors,
    );

    (entries, errors)
}

fn parse_level(
    items: &[Value],
    indent: usize,
    case_policy: CasePolicy,
    seq: &mut usize,
    entries: &mut Vec<RouteFileEntry>,
    errors: &mut Vec<RouteError>,
) {
    for item in items {
        if !errors.is_empty() {
            return;
        }
        match item {
            Value::Array(nested) => {
                parse_level(nested, indent + 1, case_policy, seq, entries, errors);
            }
            Value::Object(obj) => {
                *seq += 1;
                let line = *seq;
                if let Some(entry) = parse_entry(obj, indent, line, case_policy, errors) {
                    entries.push(entry);
                }
            }
            _ => {
                errors.push(RouteError::new(
                    RouteErrorKind::ExpectedJsonRouteFileEntryToBeObject,
                    *seq,
                ));
                return;
            }
        }
    }
}

fn parse_entry(
    obj: &serde_json::Map<String, Value>,
    indent: usize,
    line: usize,
    case_policy: CasePolicy,
    errors: &mut Vec<RouteError>,
) -> Option<RouteFileEntry> {
    let mut name = String::new();
    let mut terminal = true;
    let mut tags: BTreeSet<String> = BTreeSet::new();
    let mut methods: BTreeSet<String> = BTreeSet::new();
    let mut pattern: Option<Vec<RouteElement>> = None;

    for (key, value) in obj {
        match (key.as_str(), value) {
            ("name", Value::String(s)) => name = s.clone(),
            ("terminal", Value::Bool(b)) => terminal = *b,
            ("tags", Value::Array(items)) => {
                if !collect_strings(items, &mut tags, line, errors) {
                    return None;
                }
            }
            ("methods", Value::Array(items)) => {
                let mut raw = BTreeSet::new();
                if !collect_strings(items, &mut raw, line, errors) {
                    return None;
                }
                methods = raw.iter().map(|m| m.to_uppercase()).collect();
            }
            ("pattern", Value::Array(items)) => {
                pattern = Some(parse_pattern(items, line, errors)?);
            }
            _ => {
                errors.push(RouteError::new(
                    RouteErrorKind::UnexpectedKeyInJsonRouteFile,
                    line,
                ));
                return None;
            }
        }
    }

    if name.is_empty() {
        errors.push(RouteError::new(
            RouteErrorKind::JsonRouteMissingNameField,
            line,
        ));
        return None;
    }
    let Some(pattern) = pattern else {
        errors.push(RouteError::new(
            RouteErrorKind::JsonRouteMissingPatternField,
            line,
        ));
        return None;
    };

    if methods.is_empty() {
        methods.insert("GET".to_string());
    }

    let lexed: Vec<LexedElem> = pattern
        .iter()
        .map(|e| LexedElem {
            item: Lexed::Elem(e.clone()),
            col: 0,
        })
        .collect();
    let validation_errors = validate_route_elems(0, indent, &lexed);
    if !validation_errors.is_empty() {
        for kind in validation_errors {
            errors.push(RouteError::new(kind, line));
        }
        return None;
    }

    if case_policy == CasePolicy::DisallowUpperCase {
        for elem in &pattern {
            if let RouteElement::Constant(value) = elem {
                if value.chars().any(|r| r.to_lowercase().to_string() != r.to_string()) {
                    errors.push(RouteError::new(
                        RouteErrorKind::UpperCaseCharInRoute,
                        line,
                    ));
                    return None;
                }
            }
        }
    }

    Some(RouteFileEntry {
        indent,
        name,
        pattern,
        line,
        terminal,
        tags,
        methods,
    })
}

fn collect_strings(
    items: &[Value],
    out: &mut BTreeSet<String>,
    line: usize,
    errors: &mut Vec<RouteError>,
) -> bool {
    for item in items {
        match item {
            Value::String(s) => {
                out.insert(s.clone());
            }
            _ => {
                errors.push(RouteError::new(
                    RouteErrorKind::UnexpectedTokenInJsonRouteFile,
                    line,
                ));
                return false;
            }
        }
    }
    true
}

fn parse_pattern(
    items: &[Value],
    line: usize,
    errors: &mut Vec<RouteError>,
) -> Option<Vec<RouteElement>> {
    let mut pattern = Vec::new();

    for item in items {
        match item {
            Value::String(s) => match s.as_str() {
                "/" => pattern.push(RouteElement::Slash),
                "!/" => pattern.push(RouteElement::NoTrailingSlash),
                _ if s.contains('/') => {
                    errors.push(RouteError::new(
                        RouteErrorKind::NoSlashInsideJsonRoutePatternElement,
                        line,
                    ));
                    return None;
                }
                _ => pattern.push(RouteElement::Constant(s.clone())),
            },
            Value::Array(members) => {
                pattern.push(parse_complex_element(members, line, errors)?);
            }
            _ => {
                errors.push(RouteError::new(
                    RouteErrorKind::UnexpectedTokenInJsonRouteFile,
                    line,
                ));
                return None;
            }
        }
    }

    Some(pattern)
}

fn parse_complex_element(
    members: &[Value],
    line: usize,
    errors: &mut Vec<RouteError>,
) -> Option<RouteElement> {
    let Some(Value::String(head)) = members.first() else {
        errors.push(RouteError::new(
            RouteErrorKind::FirstMemberOfPatternElementMustBeString,
            line,
        ));
        return None;
    };

    let takes_param = match head.as_str() {
        "*" | "**" => false,
        ":" | ":**" => true,
        _ => {
            errors.push(RouteError::new(
                RouteErrorKind::BadFirstMemberOfPatternElement,
                line,
            ));
            return None;
        }
    };

    if !takes_param {
        if members.len() > 1 {
            errors.push(RouteError::new(
                RouteErrorKind::UnexpectedPatternElementMember,
                line,
            ));
            return None;
        }
        return Some(match head.as_str() {
            "*" => RouteElement::SingleGlob,
            _ => RouteElement::DoubleGlob,
        });
    }

    let Some(Value::String(param)) = members.get(1) else {
        errors.push(RouteError::new(
            RouteErrorKind::ParameterNameMustBeString,
            line,
        ));
        return None;
    };
    if members.len() > 2 {
        errors.push(RouteError::new(
            RouteErrorKind::UnexpectedPatternElementMember,
            line,
        ));
        return None;
    }

    Some(match head.as_str() {
        ":" => RouteElement::Parameter(param.clone()),
        _ => RouteElement::RestParameter(param.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use RouteElement::*;

    fn parse_ok(text: &str) -> Vec<RouteFileEntry> {
        let (entries, errors) = parse_json_route_file(text, CasePolicy::DisallowUpperCase);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        entries
    }

    fn first_error(text: &str) -> RouteErrorKind {
        let (_, errors) = parse_json_route_file(text, CasePolicy::DisallowUpperCase);
        assert!(!errors.is_empty(), "expected an error");
        errors[0].kind.clone()
    }

    #[test]
    fn test_simple_entry() {
        let entries = parse_ok(
            r#"[{"name": "users", "pattern": ["/", "users"]}]"#,
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "users");
        assert_eq!(entries[0].pattern, vec![Slash, Constant("users".into())]);
        assert!(entries[0].terminal);
        assert_eq!(entries[0].line, 1);
        let methods: Vec<&str> = entries[0].methods.iter().map(String::as_str).collect();
        assert_eq!(methods, vec!["GET"]);
    }

    #[test]
    fn test_complex_pattern_elements() {
        let entries = parse_ok(
            r#"[{"name": "r", "pattern": ["/", "x", "/", [":", "id"], "/", ["*"], "/", ["**"], "/", [":**", "rest"]]}]"#,
        );
        assert_eq!(
            entries[0].pattern,
            vec![
                Slash,
                Constant("x".into()),
                Slash,
                Parameter("id".into()),
                Slash,
                SingleGlob,
                Slash,
                DoubleGlob,
                Slash,
                RestParameter("rest".into()),
            ]
        );
    }

    #[test]
    fn test_nesting_by_subarray() {
        let entries = parse_ok(
            r#"[
                {"name": "users", "pattern": ["/", "users"], "terminal": false},
                [
                    {"name": "home", "pattern": [[":", "user_id"], "/", "home"]}
                ]
            ]"#,
        );
        assert_eq!(entries[0].indent, 0);
        assert!(!entries[0].terminal);
        assert_eq!(entries[1].indent, 1);
        assert_eq!(entries[1].line, 2);
    }

    #[test]
    fn test_tags_and_methods() {
        let entries = parse_ok(
            r#"[{"name": "r", "pattern": ["/", "x"], "tags": ["a", "b"], "methods": ["put", "POST"]}]"#,
        );
        let tags: Vec<&str> = entries[0].tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["a", "b"]);
        let methods: Vec<&str> = entries[0].methods.iter().map(String::as_str).collect();
        assert_eq!(methods, vec!["POST", "PUT"]);
    }

    #[test]
    fn test_error_not_array() {
        assert_eq!(
            first_error(r#"{"name": "r"}"#),
            RouteErrorKind::ExpectedJsonRoutesToBeArray
        );
    }

    #[test]
    fn test_error_entry_not_object() {
        assert_eq!(
            first_error(r#"["zap"]"#),
            RouteErrorKind::ExpectedJsonRouteFileEntryToBeObject
        );
    }

    #[test]
    fn test_error_unexpected_key() {
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", "x"], "zap": 1}]"#),
            RouteErrorKind::UnexpectedKeyInJsonRouteFile
        );
    }

    #[test]
    fn test_error_missing_fields() {
        assert_eq!(
            first_error(r#"[{"pattern": ["/", "x"]}]"#),
            RouteErrorKind::JsonRouteMissingNameField
        );
        assert_eq!(
            first_error(r#"[{"name": "r"}]"#),
            RouteErrorKind::JsonRouteMissingPatternField
        );
    }

    #[test]
    fn test_error_slash_inside_element() {
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", "a/b"]}]"#),
            RouteErrorKind::NoSlashInsideJsonRoutePatternElement
        );
    }

    #[test]
    fn test_error_bad_pattern_elements() {
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", [1]]}]"#),
            RouteErrorKind::FirstMemberOfPatternElementMustBeString
        );
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", ["??"]]}]"#),
            RouteErrorKind::BadFirstMemberOfPatternElement
        );
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", ["*", "extra"]]}]"#),
            RouteErrorKind::UnexpectedPatternElementMember
        );
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", [":", 5]]}]"#),
            RouteErrorKind::ParameterNameMustBeString
        );
    }

    #[test]
    fn test_error_invalid_json() {
        let kind = first_error("[{");
        assert!(matches!(
            kind,
            RouteErrorKind::InvalidJsonInJsonRouteFile(_)
        ));
    }

    #[test]
    fn test_validation_applies() {
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["x"]}]"#),
            RouteErrorKind::RootMustStartWithSlash
        );
    }

    #[test]
    fn test_case_policy() {
        assert_eq!(
            first_error(r#"[{"name": "r", "pattern": ["/", "Foo"]}]"#),
            RouteErrorKind::UpperCaseCharInRoute
        );
        let (_, errors) = parse_json_route_file(
            r#"[{"name": "r", "pattern": ["/", "Foo"]}]"#,
            CasePolicy::AllowUpperCase,
        );
        assert!(errors.is_empty());
    }
}
