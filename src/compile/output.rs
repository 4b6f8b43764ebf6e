//! JSON serialization of the compiled artifact.
//!
//! The artifact is written as bytes directly, with no intermediate
//! value tree: the output is a straight concatenation of literal
//! punctuation, escaped strings, and integers. Family keys are emitted
//! in sorted order and members in insertion order, so output bytes are
//! identical across runs and platforms.

use super::RouteRegexps;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Append `s` as a JSON string literal. Control characters, `"` and
/// `\` are escaped; non-ASCII bytes pass through (the input is valid
/// UTF-8).
pub(crate) fn append_json_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for &b in s.as_bytes() {
        match b {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            0x00..=0x1f => {
                buf.extend_from_slice(b"\\u00");
                buf.push(HEX[(b >> 4) as usize]);
                buf.push(HEX[(b & 0xf) as usize]);
            }
            _ => buf.push(b),
        }
    }
    buf.push(b'"');
}

/// Append a non-negative integer in decimal.
pub(crate) fn append_json_uint(buf: &mut Vec<u8>, mut v: usize) {
    let start = buf.len();
    loop {
        buf.push(b'0' + (v % 10) as u8);
        v /= 10;
        if v == 0 {
            break;
        }
    }
    buf[start..].reverse();
}

/// Serialize the compiled routes. Returns the JSON bytes and the number
/// of routes written.
pub fn route_regexps_to_json(rrs: &RouteRegexps) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(1024);
    let mut n_routes = 0usize;

    out.extend_from_slice(b"{\"constantPortionNGroups\":");
    append_json_uint(&mut out, rrs.constant_portion_n_groups);
    out.extend_from_slice(b",\"constantPortionRegexp\":");
    append_json_string(&mut out, &rrs.constant_portion_regexp);
    out.extend_from_slice(b",\"families\":{");

    for (fi, family) in rrs.families.iter().enumerate() {
        if fi != 0 {
            out.push(b',');
        }

        append_json_string(&mut out, &family.constant_portion);
        out.extend_from_slice(b":{\"matchRegexp\":");
        append_json_string(&mut out, &family.match_regexp);
        out.extend_from_slice(b",\"nLevels\":");
        append_json_uint(&mut out, family.n_levels);
        out.extend_from_slice(b",\"nonparamGroupNumbers\":[");
        for (i, &g) in family.nonparam_group_numbers.iter().enumerate() {
            if i != 0 {
                out.push(b',');
            }
            append_json_uint(&mut out, g);
        }
        out.extend_from_slice(b"],\"members\":[");
        for (mi, member) in family.members.iter().enumerate() {
            if mi != 0 {
                out.push(b',');
            }
            n_routes += 1;
            out.extend_from_slice(b"{\"name\":");
            append_json_string(&mut out, &member.name);
            out.extend_from_slice(b",\"paramGroupNumbers\":{");
            for (i, (name, group)) in member.param_group_numbers.iter().enumerate() {
                if i != 0 {
                    out.push(b',');
                }
                append_json_string(&mut out, name);
                out.push(b':');
                append_json_uint(&mut out, *group);
            }
            out.extend_from_slice(b"},\"tags\":[");
            for (i, tag) in member.tags.iter().enumerate() {
                if i != 0 {
                    out.push(b',');
                }
                append_json_string(&mut out, tag);
            }
            out.extend_from_slice(b"],\"methods\":[");
            for (i, method) in member.methods.iter().enumerate() {
                if i != 0 {
                    out.push(b',');
                }
                append_json_string(&mut out, method);
            }
            out.extend_from_slice(b"]}");
        }
        out.extend_from_slice(b"]}");
    }

    out.extend_from_slice(b"}}");

    (out, n_routes)
}
