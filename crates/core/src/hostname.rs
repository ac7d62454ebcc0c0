/// Effective hostname shared by a listener and a route hostname, or `""` when
/// they do not intersect.
///
/// A wildcard on either side matches any name with the same suffix; the more
/// specific of the two wins.
pub fn hostname_intersection(listener: &str, route: &str) -> String {
    if listener.is_empty() || listener == route {
        return route.to_string();
    }
    if let Some(suffix) = listener.strip_prefix('*') {
        if route.ends_with(suffix) && route.len() > suffix.len() {
            return route.to_string();
        }
    }
    if let Some(suffix) = route.strip_prefix('*') {
        if listener.ends_with(suffix) && listener.len() > suffix.len() {
            return listener.to_string();
        }
    }
    String::new()
}

/// Hostnames a route serves through a listener. An empty result with a non-empty
/// route hostname list means the route does not attach to that listener.
pub fn effective_hostnames(listener: Option<&str>, route_hostnames: &[String]) -> Vec<String> {
    let listener = listener.unwrap_or("");
    if route_hostnames.is_empty() {
        return if listener.is_empty() { Vec::new() } else { vec![listener.to_string()] };
    }
    let mut out: Vec<String> = route_hostnames
        .iter()
        .map(|h| hostname_intersection(listener, h))
        .filter(|h| !h.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
