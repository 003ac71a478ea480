//! Request routing
//!
//! Routes are matched by exact method and exact literal path; there are no
//! wildcards or path parameters. The table is filled before the server
//! starts and only read afterwards, so it is shared between sessions behind
//! an `Arc` without locking.

use super::{HttpRequest, HttpResponse, Status};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Error returned by a failing handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a handler
pub type HandlerResult = std::result::Result<HttpResponse, HandlerError>;

/// Request handler registered for a route
pub type Handler = Arc<dyn Fn(&HttpRequest) -> HandlerResult + Send + Sync>;

/// Outcome of looking up a method and path
pub enum Resolution<'a> {
    /// A handler is registered for this exact method and path
    Matched(&'a Handler),
    /// The path is known, but not for this method; carries the allowed methods
    MethodNotAllowed(Vec<&'a str>),
    /// No method is registered for the path
    NotFound,
}

/// Method and path routing table
#[derive(Clone, Default)]
pub struct Router {
    // path -> method -> handler
    routes: HashMap<String, HashMap<String, Handler>>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Router {
            routes: HashMap::new(),
        }
    }

    /// Register a handler for one method and path
    ///
    /// Registering the same method and path again replaces the handler.
    pub fn route<F>(self, method: impl Into<String>, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(method.into(), path.into(), Arc::new(handler))
    }

    /// Register one handler for several methods on the same path
    pub fn endpoint<F>(mut self, methods: &[&str], path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HandlerResult + Send + Sync + 'static,
    {
        let path = path.into();
        let handler: Handler = Arc::new(handler);
        for method in methods {
            self = self.insert(method.to_string(), path.clone(), Arc::clone(&handler));
        }
        self
    }

    fn insert(mut self, method: String, path: String, handler: Handler) -> Self {
        let methods = self.routes.entry(path).or_default();
        if methods.contains_key(&method) {
            log::debug!("Replacing handler for {}", method);
        }
        methods.insert(method, handler);
        self
    }

    /// Number of registered method and path pairs
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Methods registered for a path, sorted
    pub fn allowed_methods(&self, path: &str) -> Vec<&str> {
        let mut methods: Vec<&str> = self
            .routes
            .get(path)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        methods.sort_unstable();
        methods
    }

    /// Look up the handler for a method and path
    pub fn resolve(&self, method: &str, path: &str) -> Resolution<'_> {
        match self.routes.get(path) {
            None => Resolution::NotFound,
            Some(methods) => match methods.get(method) {
                Some(handler) => Resolution::Matched(handler),
                None => Resolution::MethodNotAllowed(self.allowed_methods(path)),
            },
        }
    }

    /// Produce the response for a request
    ///
    /// Unknown paths get 404 and known paths with another method get 405.
    /// A handler that returns an error or panics gets 500; the failure never
    /// leaves this function.
    pub fn dispatch(&self, request: &HttpRequest) -> HttpResponse {
        let method = request.method();
        let path = request.path();

        match self.resolve(method, path) {
            Resolution::NotFound => {
                log::debug!("{} {}: no route", method, path);
                HttpResponse::new(Status::NOT_FOUND)
            }
            Resolution::MethodNotAllowed(allowed) => {
                log::debug!("{} {}: method not allowed", method, path);
                HttpResponse::builder()
                    .status(Status::METHOD_NOT_ALLOWED)
                    .header("Allow", allowed.join(", "))
                    .build()
            }
            Resolution::Matched(handler) => {
                match panic::catch_unwind(AssertUnwindSafe(|| (**handler)(request))) {
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => {
                        log::warn!("{} {}: handler failed: {}", method, path, err);
                        HttpResponse::new(Status::INTERNAL_SERVER_ERROR)
                    }
                    Err(_) => {
                        log::error!("{} {}: handler panicked", method, path);
                        HttpResponse::new(Status::INTERNAL_SERVER_ERROR)
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<String> = self
            .routes
            .iter()
            .flat_map(|(path, methods)| methods.keys().map(move |m| format!("{} {}", m, path)))
            .collect();
        routes.sort();
        f.debug_struct("Router").field("routes", &routes).finish()
    }
}
