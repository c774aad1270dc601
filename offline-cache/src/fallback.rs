//! Request classes and fallback routes.

use serde::{Deserialize, Serialize};

use crate::http::Request;
use crate::key::CacheKey;

/// How the interceptor treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Top-level page load: network first, fallback page on failure.
    Navigation,
    /// Everything else: cache first.
    SubResource,
}

impl RequestClass {
    /// Classify a request by its mode.
    pub fn of(request: &Request) -> Self {
        if request.is_navigation() {
            Self::Navigation
        } else {
            Self::SubResource
        }
    }

    /// Configuration name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::SubResource => "sub_resource",
        }
    }
}

/// Substitute response for a class of requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRoute {
    /// Requests this route answers
    pub class: RequestClass,
    /// Cached entry served in their place
    pub key: CacheKey,
}

/// At most one route per request class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackTable {
    routes: Vec<FallbackRoute>,
}

impl FallbackTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the route for `class`, replacing any previous one.
    pub fn with_route(mut self, class: RequestClass, key: CacheKey) -> Self {
        self.routes.retain(|route| route.class != class);
        self.routes.push(FallbackRoute { class, key });
        self
    }

    /// Get the route for `class`
    pub fn route(&self, class: RequestClass) -> Option<&FallbackRoute> {
        self.routes.iter().find(|route| route.class == class)
    }

    /// Keys that must stay cached for the routes to be servable.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.routes.iter().map(|r| r.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// All routes in insertion order
    pub fn routes(&self) -> &[FallbackRoute] {
        &self.routes
    }

    /// Check if no route is set
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
