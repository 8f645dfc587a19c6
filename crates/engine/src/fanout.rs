//! Multi-user order fan-out.
//!
//! One logical order is replicated across every configured broker session
//! with per-user quantity scaling. Sessions are dispatched concurrently
//! through a bounded pool with a per-call timeout, so one slow or broken
//! session cannot stall the tick, and every outcome is recorded
//! independently — a user-level failure never hides another user's success.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use optexec_core::{BrokerError, EngineConfig, OrderRequest, OrderStatus, UserBrokerSession};

use crate::row::OrderRecord;

/// What came back from one user's broker call.
#[derive(Debug, Clone)]
pub struct UserOrderOutcome {
    pub user_id: String,
    /// `None` when the call failed or timed out — that user simply has no
    /// order for this leg.
    pub order_id: Option<String>,
    pub status: OrderStatus,
    pub message: String,
}

pub struct Dispatcher {
    sessions: Vec<UserBrokerSession>,
    timeout: Duration,
    concurrency: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(sessions: Vec<UserBrokerSession>, config: &EngineConfig) -> Self {
        Self {
            sessions,
            timeout: Duration::from_secs(config.fanout_timeout_secs),
            concurrency: config.fanout_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &[UserBrokerSession] {
        &self.sessions
    }

    /// Sum of all users' lot multipliers; total traded quantity for a row is
    /// `row.quantity ×` this.
    #[must_use]
    pub fn total_multiplier(&self) -> u32 {
        self.sessions.iter().map(|s| s.lot_multiplier).sum()
    }

    /// Place `req` for every session, quantity scaled per user.
    pub async fn place_all(&self, req: &OrderRequest) -> Vec<UserOrderOutcome> {
        stream::iter(self.sessions.iter())
            .map(|session| self.place_one(session, req))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn place_one(
        &self,
        session: &UserBrokerSession,
        req: &OrderRequest,
    ) -> UserOrderOutcome {
        let scaled = scale(req, session.lot_multiplier);
        let result = tokio::time::timeout(self.timeout, session.broker.place_order(&scaled)).await;
        match result {
            Ok(Ok(placed)) => UserOrderOutcome {
                user_id: session.user_id.clone(),
                order_id: Some(placed.order_id),
                status: OrderStatus::Open,
                message: placed.message,
            },
            Ok(Err(e)) => {
                tracing::warn!(user = session.user_id, error = %e, "order placement failed");
                UserOrderOutcome {
                    user_id: session.user_id.clone(),
                    order_id: None,
                    status: OrderStatus::Rejected,
                    message: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(
                    user = session.user_id,
                    timeout_secs = self.timeout.as_secs(),
                    "order placement timed out"
                );
                UserOrderOutcome {
                    user_id: session.user_id.clone(),
                    order_id: None,
                    status: OrderStatus::Rejected,
                    message: "placement timed out".to_string(),
                }
            }
        }
    }

    /// Cancel every still-working order in `orders`. Failures are logged and
    /// skipped; terminal orders are left alone.
    pub async fn cancel_all(&self, orders: &mut BTreeMap<String, OrderRecord>) {
        stream::iter(orders.iter_mut().filter(|(_, rec)| !rec.status.is_terminal()))
            .map(|(user_id, rec)| async move {
                match self.session(user_id) {
                    Some(session) => {
                        let call = session.broker.cancel_order(&rec.order_id);
                        match tokio::time::timeout(self.timeout, call).await {
                            Ok(Ok(())) => rec.status = OrderStatus::Cancelled,
                            Ok(Err(e)) => {
                                tracing::warn!(user = %user_id, error = %e, "cancel failed")
                            }
                            Err(_) => tracing::warn!(user = %user_id, "cancel timed out"),
                        }
                    }
                    None => tracing::warn!(user = %user_id, "no session for recorded order"),
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;
    }

    /// Poll the broker for the latest status of every non-terminal order.
    pub async fn refresh_statuses(&self, orders: &mut BTreeMap<String, OrderRecord>) {
        stream::iter(orders.iter_mut().filter(|(_, rec)| !rec.status.is_terminal()))
            .map(|(user_id, rec)| async move {
                let Some(session) = self.session(user_id) else {
                    return;
                };
                let call = session.broker.order_status(&rec.order_id);
                match tokio::time::timeout(self.timeout, call).await {
                    Ok(Ok(status)) => rec.status = status,
                    Ok(Err(e)) => {
                        tracing::warn!(user = %user_id, error = %e, "status poll failed");
                    }
                    Err(_) => tracing::warn!(user = %user_id, "status poll timed out"),
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;
    }

    /// Cancel one user's working order and resubmit it as a market order.
    /// Used by leg reconciliation when a user lags the rest of the row.
    pub async fn replace_with_market(
        &self,
        user_id: &str,
        rec: &mut OrderRecord,
        req: &OrderRequest,
    ) -> Result<(), BrokerError> {
        let session = self
            .session(user_id)
            .ok_or_else(|| BrokerError::Other(format!("no session for user {user_id}")))?;
        let scaled = scale(&req.as_market(), session.lot_multiplier);

        if !rec.order_id.is_empty() && !rec.status.is_terminal() {
            let call = session.broker.cancel_order(&rec.order_id);
            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(())) => {}
                // The order may have filled in the meantime; the follow-up
                // status poll will pick that up.
                Ok(Err(e)) => {
                    tracing::warn!(user = user_id, error = %e, "cancel before market resubmit failed");
                }
                Err(_) => {
                    tracing::warn!(user = user_id, "cancel before market resubmit timed out");
                }
            }
        }
        let call = session.broker.place_order(&scaled);
        let placed = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout.as_secs()))??;
        rec.order_id = placed.order_id;
        rec.status = OrderStatus::Open;
        Ok(())
    }

    /// Place an order for a single user (used to flatten filled users when a
    /// row closes).
    pub async fn place_for_user(
        &self,
        user_id: &str,
        req: &OrderRequest,
    ) -> Result<String, BrokerError> {
        let session = self
            .session(user_id)
            .ok_or_else(|| BrokerError::Other(format!("no session for user {user_id}")))?;
        let scaled = scale(req, session.lot_multiplier);
        let call = session.broker.place_order(&scaled);
        let placed = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout.as_secs()))??;
        Ok(placed.order_id)
    }

    fn session(&self, user_id: &str) -> Option<&UserBrokerSession> {
        self.sessions.iter().find(|s| s.user_id == user_id)
    }
}

fn scale(req: &OrderRequest, multiplier: u32) -> OrderRequest {
    let quantity = req.quantity.checked_mul(multiplier).unwrap_or_else(|| {
        tracing::warn!(
            quantity = req.quantity,
            multiplier,
            "scaled quantity overflows, clamping"
        );
        u32::MAX
    });
    OrderRequest {
        quantity,
        ..req.clone()
    }
}

/// Fold placement outcomes into a leg's per-user order map. Users with no
/// order id are recorded with their failure status so the snapshot shows
/// them.
pub fn record_outcomes(orders: &mut BTreeMap<String, OrderRecord>, outcomes: Vec<UserOrderOutcome>) {
    for outcome in outcomes {
        let record = OrderRecord {
            order_id: outcome.order_id.unwrap_or_default(),
            status: outcome.status,
        };
        orders.insert(outcome.user_id, record);
    }
}
