use std::collections::BTreeMap;

use konvert_core::gateway::{wire, HTTPRouteRulesMatches};
use serde_json::Value as Json;
use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct MatchSpec {
    pub paths: Vec<String>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub methods: Vec<String>,
}

fn str_at<'a>(v: &'a Json, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|s| s.as_str())
}

pub(crate) fn translate_match(m: &HTTPRouteRulesMatches) -> MatchSpec {
    let m = wire(m);
    let mut out = MatchSpec::default();
    let (kind, value) = match m.get("path") {
        Some(p) => (str_at(p, "type").unwrap_or("PathPrefix"), str_at(p, "value").unwrap_or("/")),
        None => ("PathPrefix", "/"),
    };
    out.paths.push(match kind {
        "Exact" => format!("~{}$", value),
        "RegularExpression" => format!("~{}", value),
        _ => value.to_string(),
    });
    for h in m.get("headers").and_then(|h| h.as_array()).into_iter().flatten() {
        let (name, value) = (str_at(h, "name").unwrap_or(""), str_at(h, "value").unwrap_or(""));
        let v = match str_at(h, "type") {
            Some("RegularExpression") => format!("~*{}", value),
            _ => value.to_string(),
        };
        out.headers.entry(name.to_ascii_lowercase()).or_default().push(v);
    }
    if let Some(method) = str_at(&m, "method") {
        out.methods.push(method.to_ascii_uppercase());
    }
    for q in m.get("queryParams").and_then(|q| q.as_array()).into_iter().flatten() {
        debug!(param = str_at(q, "name").unwrap_or(""), "route: query parameter matches are not supported; ignoring");
    }
    out
}

/// Match list for a rule; a rule without matches routes everything.
pub(crate) fn rule_matches(matches: &[HTTPRouteRulesMatches]) -> Vec<MatchSpec> {
    if matches.is_empty() {
        return vec![MatchSpec { paths: vec!["/".into()], ..Default::default() }];
    }
    matches.iter().map(translate_match).collect()
}
