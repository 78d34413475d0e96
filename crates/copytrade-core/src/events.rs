//! In-process domain event bus.
//!
//! Aggregates buffer events while a DB transaction is in flight and hand
//! them to the bus only after the commit succeeds. Handlers run on their own
//! spawned tasks so a slow or failing subscriber can never wedge a commit;
//! subscribers must be idempotent because a crash-and-replay can re-emit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::dlq::DeadLetterQueue;
use crate::types::{CloseReason, Market, SignalAction, Venue};

/// Events emitted by the core aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SignalDetected {
        signal_id: Uuid,
        whale_id: Uuid,
        symbol: String,
        market: Market,
        action: SignalAction,
        is_close: bool,
        detected_at: DateTime<Utc>,
    },
    SignalProcessed {
        signal_id: Uuid,
        trades_executed: u32,
        followers_considered: u32,
    },
    SignalFailed {
        signal_id: Uuid,
        error: String,
    },
    TradeExecuted {
        trade_id: Uuid,
        user_id: Uuid,
        venue: Venue,
        symbol: String,
        executed_price: Decimal,
        executed_quantity: Decimal,
    },
    TradeFailed {
        trade_id: Uuid,
        user_id: Uuid,
        error: String,
    },
    PositionOpened {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: u32,
    },
    PositionClosed {
        position_id: Uuid,
        user_id: Uuid,
        close_reason: CloseReason,
        realized_pnl: Decimal,
    },
    PositionLiquidated {
        position_id: Uuid,
        user_id: Uuid,
    },
}

impl DomainEvent {
    /// Short tag for logs and dead letters.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::SignalDetected { .. } => "signal_detected",
            DomainEvent::SignalProcessed { .. } => "signal_processed",
            DomainEvent::SignalFailed { .. } => "signal_failed",
            DomainEvent::TradeExecuted { .. } => "trade_executed",
            DomainEvent::TradeFailed { .. } => "trade_failed",
            DomainEvent::PositionOpened { .. } => "position_opened",
            DomainEvent::PositionClosed { .. } => "position_closed",
            DomainEvent::PositionLiquidated { .. } => "position_liquidated",
        }
    }
}

/// Broadcast-based publish/subscribe bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Best-effort publish; no subscribers is not an error.
    pub fn publish(&self, event: DomainEvent) {
        debug!(event = event.kind(), "publishing domain event");
        let _ = self.tx.send(event);
    }

    /// Spawn a named handler task. Each event is handled independently;
    /// a handler error is logged and dead-lettered without stopping the
    /// subscription or any other handler.
    pub fn spawn_handler<F, Fut>(
        &self,
        name: &'static str,
        dlq: Option<Arc<DeadLetterQueue>>,
        handler: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(DomainEvent) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(err) = handler(event.clone()).await {
                            error!(
                                handler = name,
                                event = event.kind(),
                                error = %err,
                                "event handler failed"
                            );
                            if let Some(dlq) = &dlq {
                                dlq.record(
                                    name,
                                    serde_json::to_value(&event).unwrap_or_default(),
                                    &err.to_string(),
                                );
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(handler = name, missed = missed, "event handler lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Events buffered by an aggregate until its transaction commits.
#[derive(Default)]
pub struct EventBuffer {
    pending: Vec<DomainEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: DomainEvent) {
        self.pending.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Publish everything recorded, in order. Call only after the commit.
    pub fn flush(&mut self, bus: &EventBus) {
        for event in self.pending.drain(..) {
            bus.publish(event);
        }
    }

    /// Drop buffered events after a rollback.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_failed(user_id: Uuid) -> DomainEvent {
        DomainEvent::TradeFailed {
            trade_id: Uuid::new_v4(),
            user_id,
            error: "venue unavailable".into(),
        }
    }

    #[tokio::test]
    async fn buffered_events_flush_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut buffer = EventBuffer::new();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        buffer.record(trade_failed(a));
        buffer.record(trade_failed(b));
        assert!(!buffer.is_empty());

        buffer.flush(&bus);
        assert!(buffer.is_empty());

        match rx.recv().await.unwrap() {
            DomainEvent::TradeFailed { user_id, .. } => assert_eq!(user_id, a),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            DomainEvent::TradeFailed { user_id, .. } => assert_eq!(user_id, b),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn cleared_buffer_publishes_nothing() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut buffer = EventBuffer::new();

        buffer.record(trade_failed(Uuid::new_v4()));
        buffer.clear();
        buffer.flush(&bus);

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn handler_failure_is_isolated_and_dead_lettered() {
        let bus = EventBus::new(16);
        let dlq = Arc::new(DeadLetterQueue::new(10));
        let handle = bus.spawn_handler("failing", Some(dlq.clone()), |_| async {
            anyhow::bail!("boom")
        });

        // Give the subscriber task time to attach.
        tokio::task::yield_now().await;
        bus.publish(trade_failed(Uuid::new_v4()));

        // The handler records the failure without dying.
        for _ in 0..50 {
            if dlq.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(dlq.len(), 1);
        assert!(!handle.is_finished());
        handle.abort();
    }
}
