use std::sync::Arc;

use crate::broker::Broker;

/// A logged-in broker session for one user, plus that user's lot multiplier.
///
/// Sessions are built at startup and shared read-only with the engine; the
/// engine scales every order's quantity by `lot_multiplier` before fan-out.
#[derive(Clone)]
pub struct UserBrokerSession {
    pub user_id: String,
    pub lot_multiplier: u32,
    pub broker: Arc<dyn Broker>,
}

impl UserBrokerSession {
    #[must_use]
    pub fn new(user_id: impl Into<String>, lot_multiplier: u32, broker: Arc<dyn Broker>) -> Self {
        Self {
            user_id: user_id.into(),
            lot_multiplier,
            broker,
        }
    }
}

impl std::fmt::Debug for UserBrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserBrokerSession")
            .field("user_id", &self.user_id)
            .field("lot_multiplier", &self.lot_multiplier)
            .finish_non_exhaustive()
    }
}
