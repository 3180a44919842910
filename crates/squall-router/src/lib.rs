//! squall-router: Zero-dependency path-pattern router
//!
//! Compiles route paths declared by a routes directory tree into matchable
//! patterns and resolves method + path lookups against them.
//!
//! ## Path Syntax
//! - `[name]` - Named parameter (captures one segment, never crosses `/`)
//! - a final `index` segment maps to the parent directory's root
//!   (`/index` -> `/`, `/api/index` -> `/api`)
//!
//! ## Matching
//! - Patterns are anchored at both ends; `/api/users/[id]` matches
//!   `/api/users/42` but not `/api/users/42/extra`
//! - Registration order is priority: the first registered route that
//!   matches a given method + path wins
//! - Trailing and duplicate slashes are normalized away on both sides, so
//!   `/a/`, `/a//` and `/a` are the same key
//!
//! ## Example
//! ```
//! use squall_router::RouteTable;
//!
//! let mut table = RouteTable::new();
//! table.register("GET", "/api/users/[id]", 0);
//!
//! let (handler, params) = table.resolve("GET", "/api/users/42").unwrap();
//! assert_eq!(*handler, 0);
//! assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
//! ```

/// Normalize a request path: collapse duplicate slashes, drop trailing
/// slashes, map the empty result to `/`.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Normalize a declared route path: request-path normalization plus the
/// `index` rule, where a final `index` segment stands for the parent
/// directory's root.
pub fn normalize_declared(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.strip_suffix("/index") {
        Some("") => "/".to_string(),
        Some(parent) => parent.to_string(),
        None => normalized,
    }
}

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Matches the exact segment text
    Literal(String),
    /// Matches any single segment, capturing it under the given name
    Param(String),
}

impl Segment {
    fn compile(raw: &str) -> Self {
        match raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
            _ => Segment::Literal(raw.to_string()),
        }
    }
}

/// A compiled route pattern with named capture segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
    declared: String,
}

impl PathPattern {
    /// Compile a declared path (applying the `index` rule) into a pattern.
    pub fn compile(declared: &str) -> Self {
        let declared = normalize_declared(declared);
        let segments = declared
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::compile)
            .collect();
        Self { segments, declared }
    }

    /// The normalized declared path this pattern was compiled from.
    pub fn declared(&self) -> &str {
        &self.declared
    }

    /// Capture names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Declared-path length, used to rank prefix specificity.
    pub fn specificity(&self) -> usize {
        self.declared.len()
    }

    /// Match a normalized path against the full pattern (anchored at both
    /// ends). Returns captured parameters in declaration order.
    pub fn match_full(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        self.capture(&parts)
    }

    /// Match a normalized path against the pattern as a leading prefix.
    pub fn match_prefix(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() < self.segments.len() {
            return false;
        }
        self.capture(&parts[..self.segments.len()]).is_some()
    }

    fn capture(&self, parts: &[&str]) -> Option<Vec<(String, String)>> {
        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(text) => {
                    if text != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.push((name.clone(), (*part).to_string()));
                }
            }
        }
        Some(params)
    }
}

/// A registered route: uppercase method, compiled pattern, handler.
#[derive(Debug, Clone)]
pub struct Route<H> {
    method: String,
    pattern: PathPattern,
    handler: H,
}

impl<H> Route<H> {
    /// The route's uppercase HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The route's compiled pattern.
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }
}

/// Route table resolving method + normalized path to a handler plus
/// extracted parameters. Registration order is priority.
#[derive(Debug, Clone, Default)]
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
}

impl<H> RouteTable<H> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a route.
    ///
    /// # Arguments
    /// * `method` - HTTP method (normalized to uppercase)
    /// * `declared` - declared path with optional `[param]` segments
    /// * `handler` - the handler invoked on a match
    pub fn register(&mut self, method: &str, declared: &str, handler: H) {
        self.routes.push(Route {
            method: method.to_uppercase(),
            pattern: PathPattern::compile(declared),
            handler,
        });
    }

    /// Resolve a method + path to the first matching route, returning its
    /// handler and captured parameters in declaration order.
    pub fn resolve(&self, method: &str, path: &str) -> Option<(&H, Vec<(String, String)>)> {
        let method = method.to_uppercase();
        let path = normalize_path(path);
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| {
                route
                    .pattern
                    .match_full(&path)
                    .map(|params| (&route.handler, params))
            })
    }

    /// Registered routes in registration order.
    pub fn routes(&self) -> &[Route<H>] {
        &self.routes
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
