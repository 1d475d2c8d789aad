//! # Dispatch Table
//!
//! Routes a decoded message to the adapter function that handles it, keyed by
//! whatever discriminator the exchange uses (topic, channel, event name).
//! Routes are tried in registration order and the first match wins, so
//! register exact keys before broad prefixes.
//!
//! ```
//! use stream_client::DispatchTable;
//!
//! #[derive(Default)]
//! struct Counts { books: u32, trades: u32 }
//!
//! let table = DispatchTable::<Counts, ()>::new()
//!     .prefix("orderbook.", |s, _ctx, _msg| { s.books += 1; Ok(()) })
//!     .prefix("publicTrade.", |s, _ctx, _msg| { s.trades += 1; Ok(()) });
//!
//! assert_eq!(table.route_index("orderbook.50.BTCUSDT"), Some(0));
//! assert_eq!(table.route_index("kline.1.BTCUSDT"), None);
//! ```

use serde_json::Value;
use std::fmt;

use crate::handler::MessageContext;
use crate::Result;

/// How a route matches a message key
pub enum Route {
    /// Key equals the string
    Exact(String),
    /// Key starts with the string
    Prefix(String),
    /// Arbitrary test on the key
    Predicate(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Route {
    /// True if `key` is served by this route
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Route::Exact(s) => key == s,
            Route::Prefix(p) => key.starts_with(p.as_str()),
            Route::Predicate(f) => f(key),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Exact(s) => write!(f, "Exact({s:?})"),
            Route::Prefix(p) => write!(f, "Prefix({p:?})"),
            Route::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

type Action<S, V> =
    Box<dyn Fn(&mut S, &mut MessageContext<'_, V>, &Value) -> Result<()> + Send + Sync>;

/// Ordered routes from message key to handler function
///
/// `S` is the adapter state the functions mutate, `V` the value type
/// delivered to waiters.
pub struct DispatchTable<S, V> {
    routes: Vec<(Route, Action<S, V>)>,
}

impl<S, V: Clone + Send + Sync + 'static> DispatchTable<S, V> {
    /// Empty table
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Add a route
    pub fn route<F>(mut self, route: Route, action: F) -> Self
    where
        F: Fn(&mut S, &mut MessageContext<'_, V>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.routes.push((route, Box::new(action)));
        self
    }

    /// Add a route matching `key` exactly
    pub fn exact<F>(self, key: &str, action: F) -> Self
    where
        F: Fn(&mut S, &mut MessageContext<'_, V>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.route(Route::Exact(key.to_string()), action)
    }

    /// Add a route matching keys that start with `prefix`
    pub fn prefix<F>(self, prefix: &str, action: F) -> Self
    where
        F: Fn(&mut S, &mut MessageContext<'_, V>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.route(Route::Prefix(prefix.to_string()), action)
    }

    /// Add a route matching keys accepted by `predicate`
    pub fn predicate<P, F>(self, predicate: P, action: F) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        F: Fn(&mut S, &mut MessageContext<'_, V>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.route(Route::Predicate(Box::new(predicate)), action)
    }

    /// Run the first route matching `key`
    ///
    /// Returns `Ok(false)` when nothing matched.
    pub fn dispatch(
        &self,
        key: &str,
        state: &mut S,
        ctx: &mut MessageContext<'_, V>,
        message: &Value,
    ) -> Result<bool> {
        match self.routes.iter().find(|(route, _)| route.matches(key)) {
            Some((_, action)) => {
                action(state, ctx, message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Index of the route that would serve `key`
    pub fn route_index(&self, key: &str) -> Option<usize> {
        self.routes.iter().position(|(route, _)| route.matches(key))
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when no routes are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<S, V: Clone + Send + Sync + 'static> Default for DispatchTable<S, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, V> fmt::Debug for DispatchTable<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|(route, _)| route))
            .finish()
    }
}
