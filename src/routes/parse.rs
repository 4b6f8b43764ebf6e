//! The line-oriented route-file grammar.
//!
//! Each non-blank line is: optional indent, route name (backslash escapes
//! allowed for whitespace), optional `[METHOD, ...]` list, the route
//! pattern, optional trailing `[tag, ...]` list. Nesting is by indent. A
//! line ending in a single `\` is spliced with the next line. `#` starts
//! a comment unless escaped or preceded by `:`. A lone `.` re-marks the
//! enclosing parent as terminal.

use std::collections::BTreeSet;

use super::error::{RouteError, RouteErrorKind};
use super::{validate_route_elems, CasePolicy, Lexed, LexedElem, RouteElement, RouteFileEntry};

/// Parse one route file. Returns the entries and every error found;
/// entries with invalid patterns are dropped.
pub fn parse_route_file(
    text: &str,
    case_policy: CasePolicy,
) -> (Vec<RouteFileEntry>, Vec<RouteError>) {
    let mut entries: Vec<RouteFileEntry> = Vec::new();
    let mut errors: Vec<RouteError> = Vec::new();

    let mut current_line = String::new();
    // Byte offset, within the spliced logical line, at which each
    // physical line starts, adjusted for stripped leading whitespace (so
    // values can go negative). Used to map columns back for error
    // reports.
    let mut line_starts: Vec<isize> = Vec::new();
    let mut source_line = 0usize;
    let mut first_source_line_of_splice = 0usize;
    let mut initial_indent: Option<usize> = None;
    let mut dot_level: Option<usize> = None;

    for line in text.lines() {
        source_line += 1;
        line_starts.push(current_line.len() as isize);

        let ends_in_single_backslash = line.ends_with('\\') && !line.ends_with("\\\\");
        if ends_in_single_backslash {
            if current_line.is_empty() {
                first_source_line_of_splice = source_line;
            }
            current_line.push_str(&line[..line.len() - 1]);
            continue;
        }

        if current_line.is_empty() {
            first_source_line_of_splice = source_line;
            current_line.push_str(line);
        } else {
            // Previous line ended with '\', so strip leading whitespace.
            let stripped = line.trim_start();
            current_line.push_str(stripped);
            let last = line_starts.len() - 1;
            line_starts[last] -= (line.len() - stripped.len()) as isize;
        }

        let whole_line = strip_comment(&current_line).trim_end().to_string();
        current_line.clear();

        process_line(
            &whole_line,
            source_line,
            first_source_line_of_splice,
            &line_starts,
            case_policy,
            &mut initial_indent,
            &mut dot_level,
            &mut entries,
            &mut errors,
        );
        line_starts.clear();
    }

    (entries, errors)
}

/// Handle one complete (spliced) logical line.
#[allow(clippy::too_many_arguments)]
fn process_line(
    whole_line: &str,
    source_line: usize,
    first_source_line_of_splice: usize,
    line_starts: &[isize],
    case_policy: CasePolicy,
    initial_indent: &mut Option<usize>,
    dot_level: &mut Option<usize>,
    entries: &mut Vec<RouteFileEntry>,
    errors: &mut Vec<RouteError>,
) {
    if whole_line.trim().is_empty() {
        return;
    }

    // Indent is counted in characters; tabs and spaces are each one.
    let mut indent = 0usize;
    let mut i = 0usize;
    while i < whole_line.len() {
        let r = char_at(whole_line, i);
        if r.is_whitespace() {
            if r != ' ' && r != '\t' {
                errors.push(RouteError::new(
                    RouteErrorKind::NontabspaceIndentationCharacter,
                    source_line,
                ));
            }
            indent += 1;
            i += r.len_utf8();
        } else if bad_code_point(r) {
            errors.push(RouteError::new(
                RouteErrorKind::RouteContainsBadCodePoint,
                source_line,
            ));
            i += r.len_utf8();
        } else {
            break;
        }
    }

    if let Some(initial) = *initial_indent {
        if indent < initial {
            errors.push(RouteError::new(
                RouteErrorKind::IndentLessThanFirstLine,
                source_line,
            ));
            return;
        }
    } else {
        *initial_indent = Some(indent);
    }

    if is_dot(whole_line) {
        let promotable = entries.last().is_some_and(|last| last.indent < indent);
        if !promotable {
            errors.push(RouteError::new(RouteErrorKind::MisplacedDot, source_line));
        }
        *dot_level = Some(indent);
        return;
    } else if dot_level.is_some_and(|d| indent < d) {
        *dot_level = None;
    }

    // A deeper entry makes the previous one a pure parent, unless a dot
    // line at or below this indent already promoted it.
    if let Some(last) = entries.last_mut() {
        if last.indent < indent && dot_level.map_or(true, |d| d < indent) {
            last.terminal = false;
        }
    }

    // Route name, with backslash escapes for whitespace.
    let mut name = String::new();
    while i < whole_line.len() {
        if whole_line.as_bytes()[i] == b'\\' {
            if i + 1 < whole_line.len() {
                let r = char_at(whole_line, i + 1);
                name.push(r);
                i += r.len_utf8() + 1;
                if bad_code_point(r) {
                    errors.push(RouteError::new(
                        RouteErrorKind::RouteContainsBadCodePoint,
                        source_line,
                    ));
                }
                if !r.is_whitespace() {
                    errors.push(RouteError::new(
                        RouteErrorKind::IllegalBackslashEscapeInRouteName,
                        source_line,
                    ));
                }
            } else {
                errors.push(RouteError::new(
                    RouteErrorKind::IllegalBackslashEscapeInRouteName,
                    source_line,
                ));
                i += 1;
            }
        } else {
            let r = char_at(whole_line, i);
            i += r.len_utf8();
            if r.is_whitespace() {
                break;
            }
            if bad_code_point(r) {
                errors.push(RouteError::new(
                    RouteErrorKind::RouteContainsBadCodePoint,
                    source_line,
                ));
            } else {
                name.push(r);
            }
        }
    }

    i = skip_whitespace(whole_line, i, source_line, errors);

    if i >= whole_line.len() {
        errors.push(RouteError::new(
            RouteErrorKind::MissingNameOrRoute,
            first_source_line_of_splice,
        ));
        return;
    }

    // Optional explicit method list.
    let mut methods: BTreeSet<String> = BTreeSet::new();
    let mut explicit_method_list = false;
    if whole_line.as_bytes()[i] == b'[' {
        explicit_method_list = true;
        i += 1;
        let mut current_method = String::new();
        let mut found_comma = false;
        while i < whole_line.len() {
            let r = char_at(whole_line, i);
            i += r.len_utf8();
            if r.is_whitespace() || r == ',' || r == ']' {
                if !current_method.is_empty() {
                    methods.insert(current_method.to_uppercase());
                    current_method.clear();
                }
                if r == ',' {
                    if found_comma {
                        errors.push(RouteError::new(
                            RouteErrorKind::TwoCommasInSequenceInMethodNames,
                            source_line,
                        ));
                    }
                    found_comma = true;
                }
            } else if bad_code_point(r) {
                errors.push(RouteError::new(
                    RouteErrorKind::RouteContainsBadCodePoint,
                    source_line,
                ));
            } else if r.is_ascii_alphabetic() {
                if !methods.is_empty() && current_method.is_empty() && !found_comma {
                    errors.push(RouteError::new(
                        RouteErrorKind::MissingCommaBetweenMethodNames,
                        source_line,
                    ));
                }
                found_comma = false;
                current_method.push(r);
            } else {
                errors.push(RouteError::new(
                    RouteErrorKind::BadCharacterInMethodName,
                    source_line,
                ));
            }

            if r == ']' {
                break;
            }
        }
    }
    if methods.is_empty() {
        if explicit_method_list {
            errors.push(RouteError::new(
                RouteErrorKind::EmptyMethodList,
                source_line,
            ));
        }
        methods.insert("GET".to_string());
    }

    i = skip_whitespace(whole_line, i, source_line, errors);

    let pattern_start = i;
    let route_string = &whole_line[i..];
    let (tags, tags_start) = get_tags(route_string);
    let pattern_string = &route_string[..tags_start];

    let pattern = parse_route(pattern_string);

    let validation_errors = validate_route_elems(
        initial_indent.unwrap_or(indent),
        indent,
        &pattern,
    );
    if !validation_errors.is_empty() {
        for kind in validation_errors {
            errors.push(RouteError::new(kind, first_source_line_of_splice));
        }
        return;
    }

    for elem in &pattern {
        match &elem.item {
            Lexed::Elem(RouteElement::Constant(value)) => {
                if case_policy == CasePolicy::DisallowUpperCase {
                    if let Some(lci) = contains_non_lower_case(value) {
                        let offset = elem.col + lci + pattern_start;
                        let col = physical_line_column(line_starts, offset) + 1;
                        errors.push(
                            RouteError::new(RouteErrorKind::UpperCaseCharInRoute, source_line)
                                .with_col(col),
                        );
                    }
                }
            }
            Lexed::Illegal(kind) => {
                errors.push(RouteError::new(kind.clone(), source_line));
            }
            Lexed::Elem(_) => {}
        }
    }

    // The initial indent level is normalized to zero so that nesting is
    // consistent across files.
    let notional_indent = if Some(indent) == *initial_indent {
        0
    } else {
        indent
    };

    entries.push(RouteFileEntry {
        indent: notional_indent,
        name,
        pattern: pattern
            .into_iter()
            .filter_map(|le| match le.item {
                Lexed::Elem(e) => Some(e),
                Lexed::Illegal(_) => None,
            })
            .collect(),
        line: first_source_line_of_splice,
        terminal: true,
        tags,
        methods,
    });
}

fn char_at(s: &str, i: usize) -> char {
    s[i..].chars().next().expect("index within string")
}

fn bad_code_point(r: char) -> bool {
    r == '\0' || (r.is_control() && r != '\t' && r != '\n' && r != '\r')
}

fn skip_whitespace(
    line: &str,
    mut i: usize,
    source_line: usize,
    errors: &mut Vec<RouteError>,
) -> usize {
    while i < line.len() {
        let r = char_at(line, i);
        if bad_code_point(r) {
            errors.push(RouteError::new(
                RouteErrorKind::RouteContainsBadCodePoint,
                source_line,
            ));
        }
        if !r.is_whitespace() {
            break;
        }
        i += r.len_utf8();
    }
    i
}

/// Map a byte offset within a spliced logical line back to a column in
/// the physical line it came from.
fn physical_line_column(line_starts: &[isize], offset: usize) -> usize {
    let offset = offset as isize;
    for &start in line_starts.iter().rev() {
        if start < offset {
            return (offset - start) as usize;
        }
    }
    0
}

/// Strip a `#` comment. A hash escaped with `\` or immediately preceded
/// by `:` (the integer-parameter marker) does not start a comment.
fn strip_comment(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out: Option<Vec<u8>> = None;

    for i in 0..bytes.len() {
        if bytes[i] == b'#' && (i == 0 || bytes[i - 1] != b':') {
            let escaped = i > 0 && bytes[i - 1] == b'\\' && (i < 2 || bytes[i - 2] != b'\\');
            if escaped {
                let out = out.get_or_insert_with(|| bytes[..i - 1].to_vec());
                out.push(b'#');
            } else {
                return match out {
                    Some(v) => bytes_to_string(v),
                    None => line[..i].to_string(),
                };
            }
        } else if let Some(out) = out.as_mut() {
            out.push(bytes[i]);
        }
    }

    match out {
        Some(v) => bytes_to_string(v),
        None => line.to_string(),
    }
}

// Comment stripping only ever removes single ASCII bytes, so the result
// is still valid UTF-8.
fn bytes_to_string(v: Vec<u8>) -> String {
    String::from_utf8(v).expect("ASCII-only edits preserve UTF-8")
}

/// A `.` line, possibly surrounded by whitespace.
fn is_dot(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed == "."
}

fn contains_non_lower_case(s: &str) -> Option<usize> {
    let mut i = 0;
    for r in s.chars() {
        let lowered: String = r.to_lowercase().collect();
        if lowered != r.to_string() {
            return Some(i);
        }
        i += r.len_utf8();
    }
    None
}

/// Parse the trailing `[tag, tag, ...]` list off the end of the pattern
/// string. Returns the tags and the byte length of the pattern once the
/// tag list and surrounding whitespace are removed. `\[`, `\]` and `\,`
/// are literal; whitespace inside a tag survives, edges are trimmed
/// unless escaped.
fn get_tags(route_string: &str) -> (BTreeSet<String>, usize) {
    let bytes = route_string.as_bytes();

    // Find a trailing unescaped ']'.
    let mut end = route_string.len();
    loop {
        let Some(r) = route_string[..end].chars().next_back() else {
            return (BTreeSet::new(), route_string.len());
        };
        if r == ']' {
            break;
        }
        if !r.is_whitespace() {
            return (BTreeSet::new(), route_string.len());
        }
        end -= r.len_utf8();
    }
    if end >= 2 && bytes[end - 2] == b'\\' {
        return (BTreeSet::new(), route_string.len());
    }

    let mut tags = BTreeSet::new();
    // Collected back to front; each char is flagged as trimmable or not.
    let mut current: Vec<(char, bool)> = Vec::new();
    let mut flush = |current: &mut Vec<(char, bool)>, tags: &mut BTreeSet<String>| {
        let start = current.iter().rposition(|&(_, keep)| keep);
        let end = current.iter().position(|&(_, keep)| keep);
        if let (Some(start), Some(end)) = (start, end) {
            let tag: String = current[end..=start].iter().rev().map(|&(c, _)| c).collect();
            if !tag.is_empty() {
                tags.insert(tag);
            }
        }
        current.clear();
    };

    let mut ti = end as isize - 2;
    let mut open_bracket: Option<usize> = None;
    while ti >= 0 {
        let b = bytes[ti as usize];
        if b == b',' || b == b'[' || b == b']' {
            if ti > 0 && bytes[ti as usize - 1] == b'\\' {
                current.push((b as char, true));
                ti -= 2;
            } else {
                flush(&mut current, &mut tags);
                if b == b'[' {
                    open_bracket = Some(ti as usize);
                    break;
                }
                ti -= 1;
            }
        } else {
            let r = last_char_ending_at(route_string, ti as usize);
            let sz = r.len_utf8() as isize;
            let escaped = ti - sz >= 1 && bytes[(ti - sz) as usize] == b'\\';
            current.push((r, !r.is_whitespace() || escaped));
            if escaped {
                ti -= 1;
            }
            ti -= sz;
        }
    }

    let Some(open) = open_bracket else {
        // False alarm: a trailing ']' with no matching '['.
        return (BTreeSet::new(), route_string.len());
    };

    let mut pattern_end = open;
    while let Some(r) = route_string[..pattern_end].chars().next_back() {
        if !r.is_whitespace() {
            break;
        }
        pattern_end -= r.len_utf8();
    }

    (tags, pattern_end)
}

/// The char whose last byte is at index `i` (inclusive).
fn last_char_ending_at(s: &str, i: usize) -> char {
    s[..=i]
        .chars()
        .next_back()
        .expect("index within string")
}

/// Lex a route pattern into elements. Illegal input is preserved as
/// in-place error markers so the caller can report every problem.
pub(crate) fn parse_route(route: &str) -> Vec<LexedElem> {
    let bytes = route.as_bytes();
    let mut elems: Vec<LexedElem> = Vec::new();

    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        let start_i = i;
        match b {
            0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F => {
                i += 1;
                elems.push(LexedElem {
                    item: Lexed::Illegal(RouteErrorKind::RouteContainsBadCodePoint),
                    col: start_i,
                });
            }
            b'?' => {
                i += 1;
                elems.push(LexedElem {
                    item: Lexed::Illegal(RouteErrorKind::QuestionMarkInRoute),
                    col: start_i,
                });
            }
            b'#' => {
                i += 1;
                elems.push(LexedElem {
                    item: Lexed::Illegal(RouteErrorKind::HashInRoute),
                    col: start_i,
                });
            }
            b'/' => {
                i += 1;
                elems.push(LexedElem {
                    item: Lexed::Elem(RouteElement::Slash),
                    col: start_i,
                });
            }
            b'!' => {
                if i + 2 == bytes.len() && bytes[i + 1] == b'/' {
                    i += 2;
                    elems.push(LexedElem {
                        item: Lexed::Elem(RouteElement::NoTrailingSlash),
                        col: start_i,
                    });
                } else {
                    i += 1;
                    elems.push(LexedElem {
                        item: Lexed::Elem(RouteElement::Constant("!".to_string())),
                        col: start_i,
                    });
                }
            }
            b'*' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'*' {
                    i += 2;
                    elems.push(LexedElem {
                        item: Lexed::Elem(RouteElement::DoubleGlob),
                        col: start_i,
                    });
                } else {
                    i += 1;
                    elems.push(LexedElem {
                        item: Lexed::Elem(RouteElement::SingleGlob),
                        col: start_i,
                    });
                }
            }
            b':' => {
                i = lex_parameter(route, i, &mut elems);
            }
            _ => {
                i = lex_constant(route, i, &mut elems);
            }
        }
    }

    elems
}

/// Lex a `:name`, `:#name`, `:**name`, `:{name}` parameter (or the
/// constant the `:` degrades to when no name follows).
fn lex_parameter(route: &str, mut i: usize, elems: &mut Vec<LexedElem>) -> usize {
    let bytes = route.as_bytes();
    let start_i = i;

    let mut is_integer = false;
    let mut is_rest = false;
    if i + 1 < bytes.len() && bytes[i + 1] == b'#' {
        is_integer = true;
        i += 1;
    } else if i + 2 < bytes.len() && bytes[i + 1] == b'*' && bytes[i + 2] == b'*' {
        is_rest = true;
        i += 2;
    }

    let make_param = |name: String| {
        if is_integer {
            RouteElement::IntegerParameter(name)
        } else if is_rest {
            RouteElement::RestParameter(name)
        } else {
            RouteElement::Parameter(name)
        }
    };

    let name_start = i;
    i += 1;
    let mut bad_escape = false;
    if name_start + 1 < bytes.len() && bytes[name_start + 1] == b'{' {
        // Braced name: anything goes except '}' and bad code points;
        // '\\', '\}' and '\#' are the legal escapes.
        i += 1;
        let mut name = String::new();
        let mut bad_char = false;
        while i < bytes.len() {
            if bytes[i] == b'}' {
                i += 1;
                break;
            }
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                i += 1;
                if !matches!(bytes[i], b'\\' | b'}' | b'#') {
                    bad_escape = true;
                }
            }
            let r = char_at(route, i);
            if r == '\0' || (r.is_whitespace() && r != ' ') || bad_code_point(r) {
                bad_char = true;
            }
            name.push(r);
            i += r.len_utf8();
        }
        if bad_char {
            elems.push(LexedElem {
                item: Lexed::Illegal(RouteErrorKind::IllegalCharInParamName),
                col: start_i,
            });
        }
        if name.is_empty() {
            elems.push(LexedElem {
                item: Lexed::Elem(RouteElement::Constant(":{}".to_string())),
                col: start_i,
            });
        } else {
            elems.push(LexedElem {
                item: Lexed::Elem(make_param(name)),
                col: start_i,
            });
        }
    } else {
        let mut name = String::new();
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                i += 1;
                if !matches!(bytes[i], b'\\' | b':' | b'#') {
                    bad_escape = true;
                }
                let r = char_at(route, i);
                name.push(r);
                i += r.len_utf8();
            } else {
                let r = char_at(route, i);
                if r == '_' || r.is_alphabetic() || r.is_numeric() {
                    name.push(r);
                    i += r.len_utf8();
                } else {
                    break;
                }
            }
        }
        if name.is_empty() {
            elems.push(LexedElem {
                item: Lexed::Elem(RouteElement::Constant(route[start_i..i].to_string())),
                col: start_i,
            });
        } else {
            elems.push(LexedElem {
                item: Lexed::Elem(make_param(name)),
                col: start_i,
            });
        }
    }

    if bad_escape {
        elems.push(LexedElem {
            item: Lexed::Illegal(RouteErrorKind::IllegalBackslashEscape),
            col: i,
        });
    }

    i
}

/// Lex a constant run. Splits the constant around any embedded illegal
/// character so that each problem is reported exactly once.
fn lex_constant(route: &str, mut i: usize, elems: &mut Vec<LexedElem>) -> usize {
    let bytes = route.as_bytes();
    let mut col = i;
    let mut value = String::new();

    while i < bytes.len() && !matches!(bytes[i], b'/' | b'!' | b'*' | b':' | b'?' | b'#') {
        if bytes[i] == b'\\' {
            i += 1;
            if i == bytes.len() {
                value.push('\\');
            } else if matches!(bytes[i], b':' | b'!' | b'[' | b']' | b'*' | b'\\') {
                value.push(bytes[i] as char);
                i += 1;
            } else {
                elems.push(LexedElem {
                    item: Lexed::Elem(RouteElement::Constant(std::mem::take(&mut value))),
                    col,
                });
                elems.push(LexedElem {
                    item: Lexed::Illegal(RouteErrorKind::IllegalBackslashEscape),
                    col: i,
                });
                col = i;
                let r = char_at(route, i);
                value.push(r);
                i += r.len_utf8();
            }
        } else {
            let r = char_at(route, i);
            if r.is_whitespace() {
                elems.push(LexedElem {
                    item: Lexed::Elem(RouteElement::Constant(std::mem::take(&mut value))),
                    col,
                });
                elems.push(LexedElem {
                    item: Lexed::Illegal(RouteErrorKind::WhitespaceInRoute),
                    col: i,
                });
                col = i + r.len_utf8();
            } else if bad_code_point(r) {
                elems.push(LexedElem {
                    item: Lexed::Elem(RouteElement::Constant(std::mem::take(&mut value))),
                    col,
                });
                elems.push(LexedElem {
                    item: Lexed::Illegal(RouteErrorKind::RouteContainsBadCodePoint),
                    col: i,
                });
                col = i + r.len_utf8();
            } else {
                value.push_str(&route[i..i + r.len_utf8()]);
            }
            i += r.len_utf8();
        }
    }

    elems.push(LexedElem {
        item: Lexed::Elem(RouteElement::Constant(value)),
        col,
    });

    i
}
