//! Stands in for the external message broker described contractually in §6:
//! one in-process broadcast fan-out per event kind. Production deployments
//! that need a real broker implement the same trait over it; nothing else
//! in this crate depends on the transport.

use std::sync::Arc;

use lbmatch_rpc::order_rpc::{NotifyEvent, OfferEvent, OrderEvent};
use lbmatch_domain::Order;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

pub trait EventBus: Send + Sync + 'static {
    fn publish_order(&self, order: Order);
    fn publish_offer(&self, chats: Vec<String>, order: Order);
    fn notify(&self, chat_id: String, message: String);

    /// §4.2: the `Confirmation -> Transfer` settlement notification is not
    /// best-effort like the rest — delivery is required for the debit to
    /// stand, so the caller gets back whether anyone was listening.
    fn notify_mandatory(&self, chat_id: String, message: String) -> bool;

    fn subscribe_orders(&self) -> broadcast::Receiver<OrderEvent>;
    fn subscribe_offers(&self) -> broadcast::Receiver<OfferEvent>;
    fn subscribe_notifications(&self) -> broadcast::Receiver<NotifyEvent>;
}

pub struct BroadcastEventBus {
    orders: broadcast::Sender<OrderEvent>,
    offers: broadcast::Sender<OfferEvent>,
    notifications: broadcast::Sender<NotifyEvent>,
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        let (orders, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (offers, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (notifications, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            orders,
            offers,
            notifications,
        }
    }
}

impl EventBus for BroadcastEventBus {
    fn publish_order(&self, order: Order) {
        // no active subscribers is not an error, every session decides for itself
        let _ = self.orders.send(OrderEvent { order });
    }

    fn publish_offer(&self, chats: Vec<String>, order: Order) {
        let _ = self.offers.send(OfferEvent { chats, order });
    }

    fn notify(&self, chat_id: String, message: String) {
        let _ = self.notifications.send(NotifyEvent {
            chat_id,
            message,
            sent_at: chrono::Utc::now(),
        });
    }

    fn notify_mandatory(&self, chat_id: String, message: String) -> bool {
        self.notifications
            .send(NotifyEvent {
                chat_id,
                message,
                sent_at: chrono::Utc::now(),
            })
            .is_ok()
    }

    fn subscribe_orders(&self) -> broadcast::Receiver<OrderEvent> {
        self.orders.subscribe()
    }

    fn subscribe_offers(&self) -> broadcast::Receiver<OfferEvent> {
        self.offers.subscribe()
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<NotifyEvent> {
        self.notifications.subscribe()
    }
}

/// Keeps a permanent receiver attached to the notifications channel so
/// `notify_mandatory`'s "was anyone listening" check has something to be
/// true of even in deployments of this repo that never stand up a chat
/// gateway (the gateway that would otherwise hold that receiver open is
/// out of scope here, see `session.rs`). Logs every delivered notification
/// as an audit trail, the same role the teacher's fallback event recorder
/// plays for events that would otherwise have nowhere to go.
pub fn spawn_notification_audit_log(event_bus: Arc<dyn EventBus>) {
    let mut rx = event_bus.subscribe_notifications();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log::info!("notification for chat {}: {}", event.chat_id, event.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("notification audit log lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order {
            id: lbmatch_domain::OrderId(1),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            client_name: "Alice".into(),
            destination_address: "addr".into(),
            payment_method: "iban".into(),
            currency: "USD".into(),
            fiat_amount: rust_decimal::Decimal::new(100, 0),
            lb_amount: rust_decimal::Decimal::new(10, 0),
            lb_contact_id: None,
            lb_fee: None,
            operator_fee: None,
            bot_fee: None,
            requisites: String::new(),
            operator_id: None,
            status: lbmatch_domain::OrderStatus::New,
            payment_requested_at: None,
            marked_payed_at: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_order() {
        let bus = BroadcastEventBus::default();
        let mut rx = bus.subscribe_orders();
        bus.publish_order(sample_order());
        let event = rx.recv().await.expect("channel open");
        assert_eq!(event.order.id, lbmatch_domain::OrderId(1));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = BroadcastEventBus::default();
        bus.publish_order(sample_order());
        bus.notify("chat".into(), "hi".into());
    }

    #[tokio::test]
    async fn mandatory_notify_reports_whether_anyone_was_listening() {
        let bus = BroadcastEventBus::default();
        assert!(!bus.notify_mandatory("chat".into(), "hi".into()));

        let _rx = bus.subscribe_notifications();
        assert!(bus.notify_mandatory("chat".into(), "hi".into()));
    }

    #[tokio::test]
    async fn notification_audit_log_keeps_mandatory_notify_deliverable() {
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        spawn_notification_audit_log(bus.clone());
        tokio::task::yield_now().await;

        assert!(bus.notify_mandatory("chat".into(), "hi".into()));
    }
}
