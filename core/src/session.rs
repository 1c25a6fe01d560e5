//! Per-operator conversational session (§4.4): one actor per chat id, lazily
//! created on first message or event, reading a message inbox and an event
//! inbox with a single worker via `tokio::select!` — the same
//! single-consumer-task idiom the manager uses, generalized to N instances
//! keyed by chat id in a `DashMap`, mirroring the teacher's chat-keyed actor
//! registries.

use std::sync::Arc;

use dashmap::DashMap;
use lbmatch_domain::{Operator, OperatorStatus, Order};
use lbmatch_rpc::order_rpc::{NotifyEvent, OfferEvent, OrderEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

use crate::manager::ManagerHandle;
use crate::rpc::event_bus::EventBus;

pub type ChatId = String;

/// §9: `SessionContext = None | PartialKey | CurrentOrder | LastReloadAt`.
/// Cleared on every transition.
#[derive(Debug, Clone, Default)]
enum SessionContext {
    #[default]
    None,
    PartialKey(String),
    CurrentOrder(Order),
    LastReloadAt(Instant),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum SessionState {
    Start,
    ChangeKey,
    WaitForOrders,
    ServeOrder,
    Unavailable,
    InterruptedAction,
}

impl SessionState {
    /// §4.4: `StateFromOpStatus` reconstruction on lazy session creation.
    fn from_operator_status(status: OperatorStatus) -> Self {
        match status {
            OperatorStatus::None | OperatorStatus::Inactive => SessionState::Start,
            OperatorStatus::Ready | OperatorStatus::Proposal => SessionState::WaitForOrders,
            OperatorStatus::Busy => SessionState::ServeOrder,
            OperatorStatus::Utility => SessionState::InterruptedAction,
        }
    }
}

/// User-originated intents. The chat transport that decodes these from a
/// particular messaging platform is outside this system (§1); this is the
/// decoded command the gateway hands to the session.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    SetKey { public: String, secret: String },
    CancelSetKey,
    StartServe,
    Accept,
    Skip,
    Cancel,
    Reload,
    /// order-status-specific command while `ServeOrder` (link contact, mark
    /// payed, confirm payment...), opaque to the state machine itself and
    /// forwarded to Core via the caller's own RPC client.
    OrderCommand(String),
}

#[derive(Debug, Clone)]
enum SessionEvent {
    Offer(OfferEvent),
    Order(OrderEvent),
    Notify(NotifyEvent),
}

/// Outbound text a session wants delivered to its chat. The actual send is
/// the caller's responsibility (chat transport is out of scope, §1).
pub struct Outbox(pub mpsc::UnboundedSender<String>);

pub struct SessionHandle {
    messages: mpsc::Sender<SessionMessage>,
}

impl SessionHandle {
    pub async fn send(&self, message: SessionMessage) {
        if self.messages.send(message).await.is_err() {
            log::warn!("session actor is gone, dropping message");
        }
    }
}

pub struct SessionRegistry {
    sessions: DashMap<ChatId, SessionHandle>,
    manager: ManagerHandle,
    event_bus: Arc<dyn EventBus>,
}

impl SessionRegistry {
    pub fn new(manager: ManagerHandle, event_bus: Arc<dyn EventBus>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            manager,
            event_bus,
        })
    }

    /// Lazily spawns the session for `chat_id` if it does not already exist,
    /// reconstructing its starting state from the operator's stored status.
    pub fn get_or_create(self: &Arc<Self>, chat_id: ChatId, operator: Operator, outbox: Outbox) {
        if self.sessions.contains_key(&chat_id) {
            return;
        }

        let (messages_tx, messages_rx) = mpsc::channel(64);
        let events_rx = self.event_bus.subscribe_offers();
        let orders_rx = self.event_bus.subscribe_orders();
        let notify_rx = self.event_bus.subscribe_notifications();

        self.sessions
            .insert(chat_id.clone(), SessionHandle { messages: messages_tx });

        let manager = self.manager.clone();
        tokio::spawn(Session {
            chat_id,
            operator_id: operator.id,
            state: SessionState::from_operator_status(operator.status),
            context: SessionContext::None,
            messages: messages_rx,
            offers: events_rx,
            orders: orders_rx,
            notifications: notify_rx,
            manager,
            outbox,
        }
        .run(true));
    }

    pub fn remove(&self, chat_id: &str) {
        self.sessions.remove(chat_id);
    }
}

struct Session {
    chat_id: ChatId,
    operator_id: lbmatch_domain::OperatorId,
    state: SessionState,
    context: SessionContext,
    messages: mpsc::Receiver<SessionMessage>,
    offers: tokio::sync::broadcast::Receiver<OfferEvent>,
    orders: tokio::sync::broadcast::Receiver<OrderEvent>,
    notifications: tokio::sync::broadcast::Receiver<NotifyEvent>,
    manager: ManagerHandle,
    outbox: Outbox,
}

impl Session {
    async fn run(mut self, loaded: bool) {
        self.enter(self.state, loaded);

        loop {
            tokio::select! {
                message = self.messages.recv() => {
                    match message {
                        Some(message) => self.on_message(message).await,
                        None => break,
                    }
                }
                offer = self.offers.recv() => {
                    if let Ok(offer) = offer {
                        if offer.chats.contains(&self.chat_id) {
                            self.on_event(SessionEvent::Offer(offer)).await;
                        }
                    }
                }
                order = self.orders.recv() => {
                    if let Ok(order) = order {
                        if order.order.operator_id == Some(self.operator_id) {
                            self.on_event(SessionEvent::Order(order)).await;
                        }
                    }
                }
                notify = self.notifications.recv() => {
                    if let Ok(notify) = notify {
                        if notify.chat_id == self.chat_id {
                            self.on_event(SessionEvent::Notify(notify)).await;
                        }
                    }
                }
            }
        }
    }

    fn send_text(&self, text: impl Into<String>) {
        let _ = self.outbox.0.send(text.into());
    }

    fn enter(&mut self, state: SessionState, loaded: bool) {
        self.context = SessionContext::None;
        log::debug!(
            "session {} entering {:?} (loaded={loaded})",
            self.chat_id,
            state
        );
        match state {
            SessionState::Start => self.send_text("send /setkey <public> <secret> to register"),
            SessionState::ChangeKey => self.send_text("awaiting new credential"),
            SessionState::WaitForOrders => self.send_text("waiting for an order offer"),
            SessionState::ServeOrder => self.send_text("serving an order"),
            SessionState::Unavailable => {
                self.context = SessionContext::LastReloadAt(Instant::now());
                self.send_text("session unavailable, send /reload to retry");
            }
            SessionState::InterruptedAction => self.send_text("session interrupted remotely"),
        }
    }

    fn exit(&mut self, _state: SessionState) {
        self.context = SessionContext::None;
    }

    fn transition(&mut self, next: SessionState, loaded: bool) {
        self.exit(self.state);
        self.state = next;
        self.enter(next, loaded);
    }

    /// Reload is throttled to one attempt per 3s (§9).
    const RELOAD_THROTTLE: Duration = Duration::from_secs(3);

    async fn on_message(&mut self, message: SessionMessage) {
        match (self.state, message) {
            (SessionState::Start, SessionMessage::SetKey { public, secret }) => {
                self.context = SessionContext::PartialKey(public.clone());
                self.transition(SessionState::ChangeKey, false);
                let _ = secret; // credential persistence happens via the RPC handler, not here
            }
            (SessionState::ChangeKey, SessionMessage::CancelSetKey) => {
                self.transition(SessionState::Start, false);
            }
            (SessionState::ChangeKey, _) => {
                self.transition(SessionState::Start, false);
            }
            (SessionState::Start, SessionMessage::StartServe) => {
                self.transition(SessionState::WaitForOrders, false);
            }
            (SessionState::WaitForOrders, SessionMessage::Accept) => {
                if let SessionContext::CurrentOrder(order) = self.context.clone() {
                    match self.manager.accept_offer(self.operator_id, order.id).await {
                        Ok(_) => self.transition(SessionState::ServeOrder, false),
                        Err(err) => self.send_text(format!("could not accept offer: {err}")),
                    }
                } else {
                    self.send_text("no pending offer to accept");
                }
            }
            (SessionState::WaitForOrders, SessionMessage::Skip) => {
                self.context = SessionContext::None;
                self.send_text("offer skipped");
            }
            (SessionState::WaitForOrders, SessionMessage::Cancel) => {
                self.transition(SessionState::Start, false);
            }
            (SessionState::ServeOrder, SessionMessage::OrderCommand(command)) => {
                self.send_text(format!("forwarded order command: {command}"));
            }
            (SessionState::Unavailable, SessionMessage::Reload) => {
                let throttled = matches!(
                    self.context,
                    SessionContext::LastReloadAt(at) if at.elapsed() < Self::RELOAD_THROTTLE
                );
                if throttled {
                    self.send_text("reload throttled, try again shortly");
                } else {
                    self.transition(SessionState::WaitForOrders, true);
                }
            }
            (state, message) => {
                log::debug!("session {} ignoring {:?} in {:?}", self.chat_id, message, state);
            }
        }
    }

    async fn on_event(&mut self, event: SessionEvent) {
        match (self.state, event) {
            (SessionState::WaitForOrders, SessionEvent::Offer(offer)) => {
                self.context = SessionContext::CurrentOrder(offer.order.clone());
                self.send_text(format!(
                    "new offer: order {} for {}",
                    offer.order.id.0, offer.order.fiat_amount
                ));
            }
            (_, SessionEvent::Order(order_event)) => {
                if order_event.order.status.is_terminal() {
                    self.transition(SessionState::WaitForOrders, false);
                }
                self.send_text(format!(
                    "order {} is now {}",
                    order_event.order.id.0, order_event.order.status
                ));
            }
            (_, SessionEvent::Notify(notify)) => {
                self.send_text(notify.message);
            }
            (state, event) => {
                log::debug!("session {} ignoring {:?} in {:?}", self.chat_id, event, state);
            }
        }
    }

    /// Any state, on an unrecoverable error, moves to `Unavailable` (§9).
    #[allow(dead_code)]
    fn on_unrecoverable_error(&mut self) {
        self.transition(SessionState::Unavailable, false);
    }

    /// Any state, on a remote-session-interrupted signal, moves here (§4.4).
    #[allow(dead_code)]
    fn on_remote_interrupted(&mut self) {
        self.transition(SessionState::InterruptedAction, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_state_reconstructed_for_unregistered_operator() {
        assert_eq!(SessionState::from_operator_status(OperatorStatus::None), SessionState::Start);
        assert_eq!(SessionState::from_operator_status(OperatorStatus::Inactive), SessionState::Start);
    }

    #[test]
    fn wait_for_orders_reconstructed_for_ready_or_proposal() {
        assert_eq!(
            SessionState::from_operator_status(OperatorStatus::Ready),
            SessionState::WaitForOrders
        );
        assert_eq!(
            SessionState::from_operator_status(OperatorStatus::Proposal),
            SessionState::WaitForOrders
        );
    }

    #[test]
    fn serve_order_reconstructed_for_busy() {
        assert_eq!(SessionState::from_operator_status(OperatorStatus::Busy), SessionState::ServeOrder);
    }

    #[test]
    fn interrupted_action_reconstructed_for_utility() {
        assert_eq!(
            SessionState::from_operator_status(OperatorStatus::Utility),
            SessionState::InterruptedAction
        );
    }
}
