//! # Connection Pool
//!
//! At most one live [`Connection`] per URL. Connections are created lazily on
//! first use with a handler built by the pool's factory, and a closed
//! connection is replaced on the next call. All connections share one
//! configuration and one subscribe throttle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use network::{Connector, Frame};

use crate::connection::Connection;
use crate::handler::MessageHandler;
use crate::throttle::SubscribeThrottle;
use crate::{ClientConfig, Result};

type HandlerFactory<H> = Box<dyn Fn(&str) -> H + Send + Sync>;

/// URL → connection map for one exchange adapter
pub struct ConnectionPool<H: MessageHandler> {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    factory: HandlerFactory<H>,
    throttle: Arc<SubscribeThrottle>,
    connections: Mutex<HashMap<String, Connection<H::Value>>>,
}

impl<H: MessageHandler> ConnectionPool<H> {
    /// Create a pool; `factory` builds the handler for each new connection
    pub fn new<F>(config: ClientConfig, connector: Arc<dyn Connector>, factory: F) -> Self
    where
        F: Fn(&str) -> H + Send + Sync + 'static,
    {
        let throttle = Arc::new(SubscribeThrottle::new(&config.throttle));
        Self {
            config: Arc::new(config),
            connector,
            factory: Box::new(factory),
            throttle,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Shared configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Live connection for `url`, spawning one if needed
    pub fn client(&self, url: &str) -> Connection<H::Value> {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(url) {
            if !existing.is_closed() {
                return existing.clone();
            }
            info!(url, "Replacing closed connection");
        }

        let connection = Connection::spawn(
            url,
            self.config.clone(),
            self.connector.clone(),
            (self.factory)(url),
            Some(self.throttle.clone()),
        );
        connections.insert(url.to_string(), connection.clone());
        connection
    }

    /// Existing connection for `url` without creating one
    pub fn get(&self, url: &str) -> Option<Connection<H::Value>> {
        self.connections.lock().get(url).cloned()
    }

    /// See [`Connection::watch`]
    pub async fn watch(
        &self,
        url: &str,
        message_hash: &str,
        subscribe: Frame,
        topic: &str,
        throttle: bool,
    ) -> Result<H::Value> {
        self.client(url)
            .watch(message_hash, subscribe, topic, throttle)
            .await
    }

    /// See [`Connection::request`]
    pub async fn request(&self, url: &str, message_hash: &str, payload: Frame) -> Result<H::Value> {
        self.client(url).request(message_hash, payload).await
    }

    /// See [`Connection::authenticate`]
    pub async fn authenticate(
        &self,
        url: &str,
        message_hash: &str,
        payload: Frame,
    ) -> Result<H::Value> {
        self.client(url).authenticate(message_hash, payload).await
    }

    /// Close and forget the connection for `url`
    pub async fn close(&self, url: &str) {
        let connection = self.connections.lock().remove(url);
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    /// Close every connection
    pub async fn close_all(&self) {
        let connections: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.close().await;
        }
    }

    /// URLs with a connection that is not closed
    pub fn urls(&self) -> Vec<String> {
        self.connections
            .lock()
            .iter()
            .filter(|(_, c)| !c.is_closed())
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Number of connections that are not closed
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|c| !c.is_closed())
            .count()
    }

    /// True when no connection is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: MessageHandler> Drop for ConnectionPool<H> {
    fn drop(&mut self) {
        for connection in self.connections.get_mut().values() {
            connection.shutdown();
        }
    }
}

impl<H: MessageHandler> fmt::Debug for ConnectionPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connector", &self.connector.name())
            .field("connections", &self.urls())
            .field("throttle", &self.throttle)
            .finish()
    }
}
