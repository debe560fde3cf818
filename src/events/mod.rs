use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Sending half of the in-process domain event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes an event and only logs a failure; callers never branch on it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "domain event dropped");
        }
    }
}

/// Creates a bounded channel and its sender handle.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ApplicationSubmitted {
        application_id: Uuid,
        order_number: String,
        invoice_id: Option<Uuid>,
    },
    ApplicationStatusChanged {
        application_id: Uuid,
        old_status: String,
        new_status: String,
    },
    QuoteIssued {
        application_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
    },
    PaymentSettled {
        invoice_id: Uuid,
        application_id: Uuid,
        transaction_id: String,
        amount: Decimal,
        paid_at: DateTime<Utc>,
    },
    PaymentFailed {
        invoice_id: Uuid,
        transaction_id: Option<String>,
    },
    AccountLinked {
        user_id: Uuid,
    },
}

/// Drains the channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ApplicationSubmitted {
                application_id,
                order_number,
                invoice_id,
            } => info!(
                %application_id,
                %order_number,
                invoice_id = ?invoice_id,
                "application submitted"
            ),
            Event::ApplicationStatusChanged {
                application_id,
                old_status,
                new_status,
            } => info!(%application_id, %old_status, %new_status, "application status changed"),
            Event::QuoteIssued {
                application_id,
                invoice_id,
                amount,
            } => info!(%application_id, %invoice_id, %amount, "quote issued"),
            Event::PaymentSettled {
                invoice_id,
                transaction_id,
                amount,
                ..
            } => info!(%invoice_id, %transaction_id, %amount, "payment settled"),
            Event::PaymentFailed {
                invoice_id,
                transaction_id,
            } => warn!(%invoice_id, transaction_id = ?transaction_id, "payment failed"),
            Event::AccountLinked { user_id } => info!(%user_id, "phone account linked"),
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_in_order() {
        let (sender, mut rx) = channel(4);
        let user_id = Uuid::new_v4();
        sender.send(Event::AccountLinked { user_id }).await.unwrap();
        sender
            .send(Event::PaymentFailed {
                invoice_id: user_id,
                transaction_id: None,
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Event::AccountLinked { user_id }));
        assert!(matches!(rx.recv().await, Some(Event::PaymentFailed { .. })));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = channel(1);
        drop(rx);
        sender
            .send_or_log(Event::AccountLinked {
                user_id: Uuid::new_v4(),
            })
            .await;
    }
}
