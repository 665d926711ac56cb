//! Per-route authorization rules, applied to both pipelines before the
//! handler runs.
//!
//! The rule table is ordered and the first matching rule wins. Anything not
//! matched falls through to `RequireAuth` — unlisted routes are never
//! silently public.

use std::collections::BTreeSet;

/// What a rule demands of the caller.
#[derive(Debug, Clone)]
pub enum Access {
    Public,
    Authenticated,
    Roles(BTreeSet<String>),
}

/// The policy's verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RequireAuth,
    Forbidden { required: Vec<String> },
}

#[derive(Debug, Clone)]
enum PathMatch {
    Exact(String),
    Prefix(String),
}

#[derive(Debug, Clone)]
pub struct Rule {
    /// `None` matches any method.
    method: Option<String>,
    path: PathMatch,
    access: Access,
}

impl Rule {
    pub fn exact(method: Option<&str>, path: &str, access: Access) -> Self {
        Self {
            method: method.map(str::to_uppercase),
            path: PathMatch::Exact(path.to_string()),
            access,
        }
    }

    pub fn prefix(method: Option<&str>, prefix: &str, access: Access) -> Self {
        Self {
            method: method.map(str::to_uppercase),
            path: PathMatch::Prefix(prefix.to_string()),
            access,
        }
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        if let Some(m) = &self.method {
            if !method.eq_ignore_ascii_case(m) {
                return false;
            }
        }
        match &self.path {
            PathMatch::Exact(p) => p == path,
            PathMatch::Prefix(p) => path.starts_with(p.as_str()),
        }
    }
}

pub struct RoutePolicy {
    rules: Vec<Rule>,
}

impl RoutePolicy {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Evaluate a request against the table. `roles` is the caller's
    /// granted-role set, or `None` when unauthenticated.
    pub fn evaluate(&self, method: &str, path: &str, roles: Option<&BTreeSet<String>>) -> Decision {
        for rule in &self.rules {
            if !rule.matches(method, path) {
                continue;
            }
            return match &rule.access {
                Access::Public => Decision::Allow,
                Access::Authenticated => match roles {
                    Some(_) => Decision::Allow,
                    None => Decision::RequireAuth,
                },
                Access::Roles(required) => match roles {
                    None => Decision::RequireAuth,
                    Some(granted) if required.intersection(granted).next().is_some() => {
                        Decision::Allow
                    }
                    Some(_) => Decision::Forbidden {
                        required: required.iter().cloned().collect(),
                    },
                },
            };
        }
        // Deny by default.
        match roles {
            Some(_) => Decision::Allow,
            None => Decision::RequireAuth,
        }
    }
}

/// Convenience for building a role set literal.
pub fn roles<const N: usize>(names: [&str; N]) -> BTreeSet<String> {
    names.into_iter().map(str::to_string).collect()
}
