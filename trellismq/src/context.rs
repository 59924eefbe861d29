use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use slog::Logger;

use trellismq_conf::Settings;
use trellismq_utils::Counter;

use crate::acl::DefaultAuth;
use crate::extend;
use crate::router::DefaultRouter;
use crate::shared::DefaultShared;
use crate::storage::DefaultStorage;

/// Shared broker state handed to every listener and session. Cloning is
/// cheap, all clones see the same internals.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<Inner>,
}

pub struct Inner {
    pub settings: Settings,
    pub logger: Logger,
    pub extends: extend::Manager,
    /// Accepted TCP connections, including ones still handshaking.
    pub connections: Counter,
    /// Sessions that completed connection setup.
    pub sessions: Counter,
}

impl Deref for ServerContext {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    pub fn new(settings: Settings, logger: Logger) -> Self {
        let extends = extend::Manager::new(
            Box::new(DefaultShared::new()),
            Box::new(DefaultRouter::new()),
            Box::new(DefaultAuth::new(settings.broker.allow_anonymous)),
            Box::new(DefaultStorage::new()),
        );
        Self {
            inner: Arc::new(Inner {
                settings,
                logger,
                extends,
                connections: Counter::new(),
                sessions: Counter::new(),
            }),
        }
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("connections", &self.connections)
            .field("sessions", &self.sessions)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use trellismq_conf::Options;

    pub(crate) fn context() -> ServerContext {
        let settings = match Settings::new(Options::default()) {
            Ok(settings) => settings,
            Err(e) => panic!("settings: {e}"),
        };
        let logger = Logger::root(slog::Discard, slog::o!());
        ServerContext::new(settings, logger)
    }
}
