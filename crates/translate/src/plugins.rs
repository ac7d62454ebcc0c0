//! HTTPRoute filters expressed as proxy plugins.

use konvert_core::gateway::{wire, HTTPRouteRulesFilters};
use serde_json::{json, Value as Json};

pub(crate) const REQUEST_HEADER_MODIFIER: &str = "RequestHeaderModifier";
pub(crate) const RESPONSE_HEADER_MODIFIER: &str = "ResponseHeaderModifier";
pub(crate) const REQUEST_REDIRECT: &str = "RequestRedirect";
pub(crate) const URL_REWRITE: &str = "URLRewrite";

fn items<'a>(v: &'a Json, key: &str) -> &'a [Json] {
    v.get(key).and_then(|a| a.as_array()).map(Vec::as_slice).unwrap_or_default()
}

fn str_at<'a>(v: &'a Json, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|s| s.as_str())
}

fn header_config(f: &Json) -> Json {
    let pairs = |key: &str| {
        items(f, key)
            .iter()
            .map(|h| format!("{}:{}", str_at(h, "name").unwrap_or(""), str_at(h, "value").unwrap_or("")))
            .collect::<Vec<_>>()
    };
    let mut cfg = serde_json::Map::new();
    // set: overwrite when present, add when absent
    let set = pairs("set");
    if !set.is_empty() {
        cfg.insert("replace".into(), json!({ "headers": set }));
        cfg.insert("add".into(), json!({ "headers": set }));
    }
    let add = pairs("add");
    if !add.is_empty() {
        cfg.insert("append".into(), json!({ "headers": add }));
    }
    let remove = items(f, "remove");
    if !remove.is_empty() {
        cfg.insert("remove".into(), json!({ "headers": remove }));
    }
    Json::Object(cfg)
}

fn redirect_config(r: &Json) -> Result<Json, String> {
    let host = str_at(r, "hostname").ok_or("redirect without hostname is not supported")?;
    let scheme = str_at(r, "scheme").unwrap_or("http");
    let mut location = match r.get("port").and_then(|p| p.as_i64()) {
        Some(p) => format!("{}://{}:{}", scheme, host, p),
        None => format!("{}://{}", scheme, host),
    };
    let keep_path = match r.get("path") {
        None | Some(Json::Null) => true,
        Some(p) if str_at(p, "type") == Some("ReplaceFullPath") => {
            location.push_str(str_at(p, "replaceFullPath").unwrap_or("/"));
            false
        }
        Some(p) => return Err(format!("redirect path modifier {} is not supported", str_at(p, "type").unwrap_or(""))),
    };
    Ok(json!({
        "status_code": r.get("statusCode").and_then(|c| c.as_i64()).unwrap_or(302),
        "location": location,
        "keep_incoming_path": keep_path,
    }))
}

/// Plugin name and config for a filter. `Ok(None)` for filters that shape the
/// route itself instead of adding a plugin.
pub(crate) fn plugin_for_filter(f: &HTTPRouteRulesFilters) -> Result<Option<(&'static str, Json)>, String> {
    let f = wire(f);
    let present = |key: &str| f.get(key).filter(|v| !v.is_null());
    match str_at(&f, "type").unwrap_or("") {
        REQUEST_HEADER_MODIFIER => {
            let m = present("requestHeaderModifier").ok_or("requestHeaderModifier is missing")?;
            Ok(Some(("request-transformer", header_config(m))))
        }
        RESPONSE_HEADER_MODIFIER => {
            let m = present("responseHeaderModifier").ok_or("responseHeaderModifier is missing")?;
            Ok(Some(("response-transformer", header_config(m))))
        }
        REQUEST_REDIRECT => {
            let r = present("requestRedirect").ok_or("requestRedirect is missing")?;
            Ok(Some(("redirect", redirect_config(r)?)))
        }
        URL_REWRITE => {
            if strips_prefix(&f) {
                Ok(None)
            } else {
                Err("only URLRewrite with ReplacePrefixMatch \"/\" is supported".into())
            }
        }
        other => Err(format!("filter type {} is not supported", other)),
    }
}

fn strips_prefix(f: &Json) -> bool {
    f.get("urlRewrite")
        .and_then(|u| u.get("path"))
        .map(|p| str_at(p, "type") == Some("ReplacePrefixMatch") && str_at(p, "replacePrefixMatch") == Some("/"))
        .unwrap_or(false)
}

/// Whether any filter strips the matched prefix.
pub(crate) fn strip_path(filters: &[HTTPRouteRulesFilters]) -> bool {
    filters.iter().map(wire).any(|f| str_at(&f, "type") == Some(URL_REWRITE) && strips_prefix(&f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(v: Json) -> HTTPRouteRulesFilters { serde_json::from_value(v).unwrap() }

    #[test]
    fn request_header_modifier_maps_to_request_transformer() {
        let f = filter(json!({
            "type": REQUEST_HEADER_MODIFIER,
            "requestHeaderModifier": {
                "set": [{"name": "x-a", "value": "1"}],
                "add": [{"name": "x-b", "value": "2"}],
                "remove": ["x-c"]
            }
        }));
        let (name, cfg) = plugin_for_filter(&f).unwrap().unwrap();
        assert_eq!(name, "request-transformer");
        assert_eq!(cfg["replace"]["headers"], json!(["x-a:1"]));
        assert_eq!(cfg["add"]["headers"], json!(["x-a:1"]));
        assert_eq!(cfg["append"]["headers"], json!(["x-b:2"]));
        assert_eq!(cfg["remove"]["headers"], json!(["x-c"]));
    }

    #[test]
    fn redirect_builds_location() {
        let f = filter(json!({
            "type": REQUEST_REDIRECT,
            "requestRedirect": {"scheme": "https", "hostname": "example.com", "statusCode": 301}
        }));
        let (name, cfg) = plugin_for_filter(&f).unwrap().unwrap();
        assert_eq!(name, "redirect");
        assert_eq!(cfg["location"], "https://example.com");
        assert_eq!(cfg["status_code"], 301);
        assert_eq!(cfg["keep_incoming_path"], true);
    }

    #[test]
    fn prefix_rewrite_to_root_strips_path() {
        let f = filter(json!({
            "type": URL_REWRITE,
            "urlRewrite": {"path": {"type": "ReplacePrefixMatch", "replacePrefixMatch": "/"}}
        }));
        assert_eq!(plugin_for_filter(&f).unwrap(), None);
        assert!(strip_path(&[f]));
    }

    #[test]
    fn unsupported_filters_are_errors() {
        let f = filter(json!({"type": "RequestMirror", "requestMirror": {"backendRef": {"name": "m"}}}));
        assert!(plugin_for_filter(&f).unwrap_err().contains("RequestMirror"));
        let missing = filter(json!({"type": REQUEST_REDIRECT}));
        assert!(plugin_for_filter(&missing).is_err());
    }
}
