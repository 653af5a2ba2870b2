//! Method + path-pattern routing with `:name` segment parameters.
//!
//! Routes are tried in registration order and the first match wins. A single
//! method-independent fallback can be installed for everything else.

use std::collections::HashMap;

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct Route<H> {
    method: String,
    pattern: Regex,
    params: Vec<String>,
    handler: H,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<H> {
    pub handler: H,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Router<H> {
    routes: Vec<Route<H>>,
    fallback: Option<H>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            fallback: None,
        }
    }
}

/// Compile `/v1/files/:file_id/content` into an anchored regex plus parameter names.
fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>), RouterError> {
    let mut params = Vec::new();
    let mut source = String::from("^");
    for (i, segment) in pattern.split('/').enumerate() {
        if i > 0 {
            source.push('/');
        }
        match segment.strip_prefix(':') {
            Some(name) if !name.is_empty() => {
                params.push(name.to_string());
                source.push_str("([^/]+)");
            }
            _ => source.push_str(&regex::escape(segment)),
        }
    }
    source.push('$');

    let regex = Regex::new(&source).map_err(|source| RouterError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok((regex, params))
}

impl<H: Clone> Router<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, method: &str, pattern: &str, handler: H) -> Result<(), RouterError> {
        let (regex, params) = compile_pattern(pattern)?;
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            pattern: regex,
            params,
            handler,
        });
        Ok(())
    }

    pub fn get(&mut self, pattern: &str, handler: H) -> Result<(), RouterError> {
        self.on("GET", pattern, handler)
    }

    /// Handler for any method and path no route matched.
    pub fn any(&mut self, handler: H) {
        self.fallback = Some(handler);
    }

    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch<H>> {
        let method = method.to_ascii_uppercase();
        for route in self.routes.iter().filter(|r| r.method == method) {
            let Some(caps) = route.pattern.captures(path) else {
                continue;
            };
            let params = route
                .params
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.get(i + 1)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect();
            return Some(RouteMatch {
                handler: route.handler.clone(),
                params,
            });
        }
        self.fallback.clone().map(|handler| RouteMatch {
            handler,
            params: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_segments() {
        let mut router = Router::new();
        router.get("/v1/files/:file_id/content", "content").unwrap();
        router.get("/v1/files/:file_id", "file").unwrap();

        let m = router.match_route("get", "/v1/files/file-abc/content").unwrap();
        assert_eq!(m.handler, "content");
        assert_eq!(m.params["file_id"], "file-abc");

        let m = router.match_route("GET", "/v1/files/file-abc").unwrap();
        assert_eq!(m.handler, "file");

        // Segments never span slashes.
        assert!(router.match_route("GET", "/v1/files/a/b").is_none());
    }

    #[test]
    fn first_registered_route_wins() {
        let mut router = Router::new();
        router.get("/v1/responses/:id", "param").unwrap();
        router.get("/v1/responses/latest", "literal").unwrap();
        assert_eq!(router.match_route("GET", "/v1/responses/latest").unwrap().handler, "param");
    }

    #[test]
    fn method_must_match_and_fallback_catches_rest() {
        let mut router = Router::new();
        router.on("POST", "/v1/chat/completions", "chat").unwrap();
        assert!(router.match_route("GET", "/v1/chat/completions").is_none());
        assert!(router.match_route("POST", "/v1/chat/completions/").is_none());

        router.any("fallback");
        let m = router.match_route("PATCH", "/anything/at/all").unwrap();
        assert_eq!(m.handler, "fallback");
        assert!(m.params.is_empty());
        assert_eq!(router.match_route("POST", "/v1/chat/completions").unwrap().handler, "chat");
    }

    #[test]
    fn literal_segments_are_escaped() {
        let mut router = Router::new();
        router.get("/v1/models/gpt-4.1", "dot").unwrap();
        assert!(router.match_route("GET", "/v1/models/gpt-4x1").is_none());
        assert!(router.match_route("GET", "/v1/models/gpt-4.1").is_some());
    }
}
