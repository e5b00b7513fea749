//! End-to-end behavior of the messaging core against the in-memory store

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use gigdesk_api::messaging::store::TicketRollup;
use gigdesk_api::messaging::{
    ConversationResolver, MemoryDirectory, MemoryMessageStore, MessageService, MessageStore,
    MessagingLimits, Page, SendRequest, TicketAggregator,
};
use gigdesk_api::websocket::connection::Connection;
use gigdesk_api::websocket::events::ServerEvent;
use gigdesk_api::websocket::{EventSink, RoomManager};
use gigdesk_shared::{
    ChatResult, ConversationKey, ErrorKind, Message, MessageId, MessageKind, NewMessage, Order,
    OrderId, OrderStatus, RoomKey, TicketStatus, UserId,
};
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(Vec<RoomKey>, ServerEvent)>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<(Vec<RoomKey>, ServerEvent)> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, rooms: &[RoomKey], event: ServerEvent) -> usize {
        self.events.lock().unwrap().push((rooms.to_vec(), event));
        0
    }
}

struct Harness {
    store: Arc<MemoryMessageStore>,
    directory: Arc<MemoryDirectory>,
    sink: Arc<RecordingSink>,
    service: MessageService,
    tickets: TicketAggregator,
    buyer: UserId,
    seller: UserId,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryMessageStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let sink = Arc::new(RecordingSink::default());
        let buyer = UserId::new();
        let seller = UserId::new();

        for (id, status) in [(42, OrderStatus::InProgress), (7, OrderStatus::Pending)] {
            directory
                .upsert_order(Order {
                    id: OrderId(id),
                    buyer_id: buyer,
                    seller_id: seller,
                    status,
                })
                .await;
        }

        let resolver = ConversationResolver::new(directory.clone(), directory.clone());
        let service = MessageService::new(
            store.clone(),
            resolver,
            sink.clone(),
            MessagingLimits::default(),
        );
        let tickets = TicketAggregator::new(store.clone(), directory.clone());

        Self {
            store,
            directory,
            sink,
            service,
            tickets,
            buyer,
            seller,
        }
    }

    async fn send_order(&self, sender: UserId, receiver: UserId, body: &str) -> gigdesk_shared::Message {
        self.service
            .send(SendRequest {
                order_id: Some(OrderId(42)),
                sender_id: sender,
                receiver_id: receiver,
                body: body.to_string(),
            })
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn order_send_persists_unread_open_message() {
    let h = Harness::new().await;

    let message = h.send_order(h.buyer, h.seller, "hello").await;
    assert!(!message.is_read);
    assert_eq!(message.ticket_status, Some(TicketStatus::Open));
    assert_eq!(message.kind, MessageKind::User);
    assert_eq!(message.conversation_key(), ConversationKey::Order(OrderId(42)));

    let events = h.sink.take();
    assert_eq!(events.len(), 1);
    let (rooms, event) = &events[0];
    assert_eq!(
        rooms,
        &vec![
            RoomKey::Conversation(ConversationKey::Order(OrderId(42))),
            RoomKey::User(h.seller),
        ]
    );
    assert!(matches!(event, ServerEvent::NewMessage { message: m, .. } if m.id == message.id));
}

#[tokio::test]
async fn completed_order_rejects_sends() {
    let h = Harness::new().await;
    h.send_order(h.buyer, h.seller, "hello").await;
    h.sink.take();

    h.directory
        .set_order_status(OrderId(42), OrderStatus::Completed)
        .await;

    let err = h
        .service
        .send(SendRequest {
            order_id: Some(OrderId(42)),
            sender_id: h.buyer,
            receiver_id: h.seller,
            body: "still there?".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.store.len().await, 1);
    assert!(h.sink.take().is_empty());

    // The ticket can still be closed after the order is done
    let change = h
        .service
        .set_ticket_status(OrderId(42), TicketStatus::Closed, h.buyer)
        .await
        .unwrap();
    assert_eq!(change.status, TicketStatus::Closed);
    assert_eq!(change.system_message, None);

    let history = h
        .service
        .history(h.seller, ConversationKey::Order(OrderId(42)), None, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history
        .iter()
        .all(|m| m.ticket_status == Some(TicketStatus::Closed)));
}

#[tokio::test]
async fn bulk_mark_read_flips_only_unread_and_emits_once() {
    let h = Harness::new().await;
    let first = h.send_order(h.buyer, h.seller, "one").await;
    let second = h.send_order(h.buyer, h.seller, "two").await;
    let already_read = h.send_order(h.buyer, h.seller, "three").await;
    let own = h.send_order(h.seller, h.buyer, "reply").await;

    assert_eq!(
        h.service
            .mark_message_read(h.seller, already_read.id)
            .await
            .unwrap(),
        vec![already_read.id]
    );
    h.sink.take();

    let conversation = ConversationKey::Order(OrderId(42));
    let ids = h
        .service
        .mark_conversation_read(h.seller, conversation)
        .await
        .unwrap();
    assert_eq!(ids, vec![first.id, second.id]);

    let events = h.sink.take();
    assert_eq!(events.len(), 1);
    match &events[0] {
        (rooms, ServerEvent::MessagesRead { reader_id, message_ids, .. }) => {
            assert_eq!(*reader_id, h.seller);
            assert_eq!(message_ids, &vec![first.id, second.id]);
            assert!(rooms.contains(&RoomKey::User(h.buyer)));
        }
        other => panic!("Expected MessagesRead, got {:?}", other),
    }

    // The seller's own message is still unread by the buyer
    let stored = h.store.get(own.id).await.unwrap().unwrap();
    assert!(!stored.is_read);
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let h = Harness::new().await;
    h.send_order(h.buyer, h.seller, "hello").await;
    let conversation = ConversationKey::Order(OrderId(42));

    assert_eq!(
        h.service
            .mark_conversation_read(h.seller, conversation)
            .await
            .unwrap()
            .len(),
        1
    );
    h.sink.take();

    let again = h
        .service
        .mark_conversation_read(h.seller, conversation)
        .await
        .unwrap();
    assert!(again.is_empty());
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn only_receiver_marks_single_message() {
    let h = Harness::new().await;
    let message = h.send_order(h.buyer, h.seller, "hello").await;

    let err = h
        .service
        .mark_message_read(h.buyer, message.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = h
        .service
        .mark_message_read(h.seller, gigdesk_shared::MessageId(9_999))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn direct_messages_share_one_conversation() {
    let h = Harness::new().await;
    let x = UserId::new();
    let y = UserId::new();
    h.directory.add_user(x).await;
    h.directory.add_user(y).await;

    let from_x = h
        .service
        .send(SendRequest {
            order_id: None,
            sender_id: x,
            receiver_id: y,
            body: "hi y".to_string(),
        })
        .await
        .unwrap();
    let from_y = h
        .service
        .send(SendRequest {
            order_id: None,
            sender_id: y,
            receiver_id: x,
            body: "hi x".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(from_x.conversation_key(), from_y.conversation_key());
    assert_eq!(from_x.ticket_status, None);

    let history = h
        .service
        .history(x, ConversationKey::direct(y, x), None, None)
        .await
        .unwrap();
    assert_eq!(
        history.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![from_x.id, from_y.id]
    );

    let stranger = UserId::new();
    let err = h
        .service
        .history(stranger, ConversationKey::direct(x, y), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn direct_send_to_unknown_user_fails() {
    let h = Harness::new().await;
    let err = h
        .service
        .send(SendRequest {
            order_id: None,
            sender_id: h.buyer,
            receiver_id: UserId::new(),
            body: "anyone?".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn ticket_status_requires_a_party() {
    let h = Harness::new().await;
    let first = h.send_order(h.buyer, h.seller, "hello").await;
    h.send_order(h.seller, h.buyer, "hi").await;
    h.sink.take();

    let change = h
        .service
        .set_ticket_status(OrderId(42), TicketStatus::Closed, h.buyer)
        .await
        .unwrap();
    assert_eq!(change.status, TicketStatus::Closed);
    assert_eq!(change.system_message, None);

    let stored = h.store.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.ticket_status, Some(TicketStatus::Closed));

    let events = h.sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].1,
        ServerEvent::TicketUpdated {
            order_id: OrderId(42),
            status: TicketStatus::Closed,
        }
    );

    let outsider = UserId::new();
    h.directory.add_user(outsider).await;
    let err = h
        .service
        .set_ticket_status(OrderId(42), TicketStatus::Closed, outsider)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(h.sink.take().is_empty());

    // Later sends inherit the closed status; reopening is allowed
    let next = h.send_order(h.buyer, h.seller, "one more thing").await;
    assert_eq!(next.ticket_status, Some(TicketStatus::Closed));
    h.service
        .set_ticket_status(OrderId(42), TicketStatus::Open, h.seller)
        .await
        .unwrap();
    let tickets = h.tickets.list_tickets(h.buyer).await.unwrap();
    let ticket = tickets.iter().find(|t| t.ticket_id == OrderId(42)).unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);
}

#[tokio::test]
async fn ticket_status_on_empty_order_synthesizes_message() {
    let h = Harness::new().await;

    let change = h
        .service
        .set_ticket_status(OrderId(7), TicketStatus::Closed, h.buyer)
        .await
        .unwrap();

    let system = change.system_message.expect("system message");
    assert_eq!(system.kind, MessageKind::System);
    assert_eq!(system.order_id, Some(OrderId(7)));
    assert_eq!(system.ticket_status, Some(TicketStatus::Closed));
    assert_eq!(system.sender_id, h.buyer);
    assert_eq!(system.receiver_id, h.seller);

    let history = h
        .service
        .history(h.seller, ConversationKey::Order(OrderId(7)), None, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let names: Vec<&str> = h.sink.take().iter().map(|(_, e)| e.name()).collect();
    assert_eq!(names, vec!["new_message", "ticket_updated"]);

    let tickets = h.tickets.list_tickets(h.seller).await.unwrap();
    let ticket = tickets.iter().find(|t| t.ticket_id == OrderId(7)).unwrap();
    assert_eq!(ticket.status, TicketStatus::Closed);
    assert_eq!(ticket.unread_count, 0);
}

/// Delegates to the memory store but never matches rows on ticket updates
struct StaleTicketStore {
    inner: MemoryMessageStore,
}

#[async_trait]
impl MessageStore for StaleTicketStore {
    async fn insert(&self, message: NewMessage) -> ChatResult<Message> {
        self.inner.insert(message).await
    }

    async fn get(&self, id: MessageId) -> ChatResult<Option<Message>> {
        self.inner.get(id).await
    }

    async fn list(&self, conversation: &ConversationKey, page: Page) -> ChatResult<Vec<Message>> {
        self.inner.list(conversation, page).await
    }

    async fn latest_ticket_status(&self, order_id: OrderId) -> ChatResult<Option<TicketStatus>> {
        self.inner.latest_ticket_status(order_id).await
    }

    async fn count_order_messages(&self, order_id: OrderId) -> ChatResult<i64> {
        self.inner.count_order_messages(order_id).await
    }

    async fn latest_sent_at(
        &self,
        conversation: &ConversationKey,
    ) -> ChatResult<Option<OffsetDateTime>> {
        self.inner.latest_sent_at(conversation).await
    }

    async fn mark_conversation_read(
        &self,
        conversation: &ConversationKey,
        viewer: UserId,
    ) -> ChatResult<Vec<MessageId>> {
        self.inner.mark_conversation_read(conversation, viewer).await
    }

    async fn mark_message_read(
        &self,
        id: MessageId,
        viewer: UserId,
    ) -> ChatResult<Option<MessageId>> {
        self.inner.mark_message_read(id, viewer).await
    }

    async fn set_ticket_status(&self, _order_id: OrderId, _status: TicketStatus) -> ChatResult<u64> {
        Ok(0)
    }

    async fn ticket_rollups(
        &self,
        order_ids: &[OrderId],
        viewer: UserId,
    ) -> ChatResult<Vec<TicketRollup>> {
        self.inner.ticket_rollups(order_ids, viewer).await
    }

    async fn unread_count(&self, viewer: UserId) -> ChatResult<i64> {
        self.inner.unread_count(viewer).await
    }

    async fn health_check(&self) -> ChatResult<()> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn ticket_update_matching_no_rows_is_reported() {
    let directory = Arc::new(MemoryDirectory::new());
    let sink = Arc::new(RecordingSink::default());
    let buyer = UserId::new();
    let seller = UserId::new();
    directory
        .upsert_order(Order {
            id: OrderId(1),
            buyer_id: buyer,
            seller_id: seller,
            status: OrderStatus::InProgress,
        })
        .await;

    let service = MessageService::new(
        Arc::new(StaleTicketStore {
            inner: MemoryMessageStore::new(),
        }),
        ConversationResolver::new(directory.clone(), directory),
        sink.clone(),
        MessagingLimits::default(),
    );

    // First change synthesizes a message, so the order is no longer empty
    let change = service
        .set_ticket_status(OrderId(1), TicketStatus::Closed, buyer)
        .await
        .unwrap();
    assert!(change.system_message.is_some());
    sink.take();

    let err = service
        .set_ticket_status(OrderId(1), TicketStatus::Open, seller)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(sink
        .take()
        .iter()
        .all(|(_, event)| !matches!(event, ServerEvent::TicketUpdated { .. })));
}

#[tokio::test]
async fn sent_at_never_goes_backwards_within_a_conversation() {
    let h = Harness::new().await;
    let ahead = OffsetDateTime::now_utc() + Duration::hours(1);
    let earlier = h
        .store
        .insert(NewMessage {
            order_id: Some(OrderId(42)),
            sender_id: h.seller,
            receiver_id: h.buyer,
            body: "from a fast clock".to_string(),
            sent_at: ahead,
            is_read: false,
            ticket_status: Some(TicketStatus::Open),
            kind: MessageKind::User,
        })
        .await
        .unwrap();

    let later = h.send_order(h.buyer, h.seller, "reply").await;
    assert!(later.sent_at >= ahead);

    let history = h
        .service
        .history(h.buyer, ConversationKey::Order(OrderId(42)), None, None)
        .await
        .unwrap();
    assert_eq!(
        history.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![earlier.id, later.id]
    );

    // Other conversations keep the wall clock
    let other = h
        .service
        .send(SendRequest {
            order_id: Some(OrderId(7)),
            sender_id: h.buyer,
            receiver_id: h.seller,
            body: "separate order".to_string(),
        })
        .await
        .unwrap();
    assert!(other.sent_at < ahead);
}

#[tokio::test]
async fn ticket_status_on_unknown_order_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .service
        .set_ticket_status(OrderId(404), TicketStatus::Closed, h.buyer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn store_failure_surfaces_to_sender() {
    let h = Harness::new().await;
    h.store.set_unavailable(true);

    let err = h
        .service
        .send(SendRequest {
            order_id: Some(OrderId(42)),
            sender_id: h.buyer,
            receiver_id: h.seller,
            body: "hello".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientStoreError);
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn invalid_sends_write_nothing() {
    let h = Harness::new().await;
    let too_long = "x".repeat(5_001);

    for body in ["", "   ", too_long.as_str()] {
        let err = h
            .service
            .send(SendRequest {
                order_id: Some(OrderId(42)),
                sender_id: h.buyer,
                receiver_id: h.seller,
                body: body.to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    assert!(h.store.is_empty().await);
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn concurrent_sends_broadcast_in_persisted_order() {
    let h = Arc::new(Harness::new().await);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let (from, to) = if i % 2 == 0 {
                    (h.buyer, h.seller)
                } else {
                    (h.seller, h.buyer)
                };
                h.send_order(from, to, &format!("message {}", i)).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let broadcast: Vec<_> = h
        .sink
        .take()
        .into_iter()
        .filter_map(|(_, event)| match event {
            ServerEvent::NewMessage { message, .. } => Some(message.ordering_key()),
            _ => None,
        })
        .collect();
    assert_eq!(broadcast.len(), 20);
    assert!(broadcast.windows(2).all(|w| w[0] <= w[1]));

    let history = h
        .service
        .history(h.buyer, ConversationKey::Order(OrderId(42)), Some(100), None)
        .await
        .unwrap();
    assert_eq!(history.len(), 20);
    assert!(history.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
}

#[tokio::test]
async fn concurrent_mark_read_flips_each_message_once() {
    let h = Arc::new(Harness::new().await);
    for i in 0..10 {
        h.send_order(h.buyer, h.seller, &format!("m{}", i)).await;
    }

    let conversation = ConversationKey::Order(OrderId(42));
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.service
                    .mark_conversation_read(h.seller, conversation)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap().len();
    }
    assert_eq!(total, 10);
    assert_eq!(h.service.unread_count(h.seller).await.unwrap(), 0);
}

#[tokio::test]
async fn live_rooms_deliver_once_per_connection() {
    let store = Arc::new(MemoryMessageStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    let rooms = Arc::new(RoomManager::new());
    let buyer = UserId::new();
    let seller = UserId::new();
    directory
        .upsert_order(Order {
            id: OrderId(42),
            buyer_id: buyer,
            seller_id: seller,
            status: OrderStatus::InProgress,
        })
        .await;

    let service = MessageService::new(
        store,
        ConversationResolver::new(directory.clone(), directory),
        rooms.clone(),
        MessagingLimits::default(),
    );

    // Seller is viewing the order and also sits in their own user room
    let (tx, mut seller_rx) = mpsc::unbounded_channel();
    let seller_conn = Arc::new(Connection::new(seller, tx));
    rooms
        .join(ConversationKey::Order(OrderId(42)).into(), seller_conn.clone())
        .await;
    rooms.join(RoomKey::User(seller), seller_conn.clone()).await;

    // Seller's second device only has the notification room
    let (tx, mut phone_rx) = mpsc::unbounded_channel();
    let phone = Arc::new(Connection::new(seller, tx));
    rooms.join(RoomKey::User(seller), phone.clone()).await;

    service
        .send(SendRequest {
            order_id: Some(OrderId(42)),
            sender_id: buyer,
            receiver_id: seller,
            body: "hello".to_string(),
        })
        .await
        .unwrap();

    assert!(matches!(seller_rx.try_recv(), Ok(ServerEvent::NewMessage { .. })));
    assert!(seller_rx.try_recv().is_err());
    assert!(matches!(phone_rx.try_recv(), Ok(ServerEvent::NewMessage { .. })));

    // A disconnected device receives nothing further
    rooms.remove_connection(&phone).await;
    service
        .send(SendRequest {
            order_id: Some(OrderId(42)),
            sender_id: buyer,
            receiver_id: seller,
            body: "again".to_string(),
        })
        .await
        .unwrap();
    assert!(phone_rx.try_recv().is_err());
    assert!(matches!(seller_rx.try_recv(), Ok(ServerEvent::NewMessage { .. })));
}
