//! Shared utilities for the end-to-end compile-and-route tests.
#![allow(dead_code)]

use std::collections::HashMap;

use routemap::compile;
use routemap::filter::TagExpr;
use routemap::routes::{parse_route_files, CasePolicy, RouteError};
use routemap::{Options, Router};

/// Compile route-file sources into artifact JSON bytes. Panics on any
/// compile error; use [`compile_errors`] to inspect failures.
pub fn build_artifact(files: &[(&str, &str)], filter: Option<&str>, policy: CasePolicy) -> Vec<u8> {
    let inputs: Vec<(String, String)> = files
        .iter()
        .map(|(name, text)| (name.to_string(), text.to_string()))
        .collect();

    let (entries, errors) = parse_route_files(&inputs, policy);
    assert!(errors.is_empty(), "parse errors: {errors:?}");

    let filenames: Vec<String> = inputs.iter().map(|(name, _)| name.clone()).collect();
    let options = Options {
        case_policy: policy,
        ..Options::default()
    };
    let (mut routes, errors) =
        compile::process_route_file(&entries, &filenames, &options, &mut |_, _| {});
    assert!(errors.is_empty(), "process errors: {errors:?}");

    let expr = filter.map(|f| {
        TagExpr::parse(f)
            .expect("filter should parse")
            .expect("filter should be non-empty")
    });
    let rrs = compile::get_route_regexps(&mut routes, expr.as_ref());
    compile::route_regexps_to_json(&rrs).0
}

/// Compile and return every error, parse-stage or process-stage.
pub fn compile_errors(files: &[(&str, &str)], policy: CasePolicy) -> Vec<RouteError> {
    let inputs: Vec<(String, String)> = files
        .iter()
        .map(|(name, text)| (name.to_string(), text.to_string()))
        .collect();

    let (entries, errors) = parse_route_files(&inputs, policy);
    if !errors.is_empty() {
        return errors;
    }

    let filenames: Vec<String> = inputs.iter().map(|(name, _)| name.clone()).collect();
    let options = Options {
        case_policy: policy,
        ..Options::default()
    };
    let (_, errors) = compile::process_route_file(&entries, &filenames, &options, &mut |_, _| {});
    errors
}

/// Compile one route file and stand up a router over the artifact.
pub fn router_for(text: &str, case_sensitive: bool) -> Router {
    let policy = if case_sensitive {
        CasePolicy::AllowUpperCase
    } else {
        CasePolicy::DisallowUpperCase
    };
    let artifact = build_artifact(&[("routes", text)], None, policy);
    Router::from_json(&artifact, case_sensitive).expect("artifact should deserialize")
}

#[track_caller]
pub fn assert_no_route(router: &Router, url: &str) {
    assert!(
        router.route(url).is_none(),
        "expected {url} not to be found"
    );
}

#[allow(clippy::too_many_arguments)]
#[track_caller]
pub fn assert_route(
    router: &Router,
    url: &str,
    name: &str,
    params: &[(&str, &str)],
    query: &str,
    anchor: &str,
    methods: &[&str],
    tags: &[&str],
) {
    let result = router
        .route(url)
        .unwrap_or_else(|| panic!("expected {url} to be found"));

    assert_eq!(result.name, name, "route name for {url}");

    let expected_params: HashMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(result.params, expected_params, "params for {url}");

    assert_eq!(result.query, query, "query for {url}");
    assert_eq!(result.anchor, anchor, "anchor for {url}");

    let expected_methods: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
    assert_eq!(result.methods, expected_methods, "methods for {url}");

    let expected_tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    assert_eq!(result.tags, expected_tags, "tags for {url}");
}
