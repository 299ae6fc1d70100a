use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use super::mock_exchange_server::{AuthBehavior, MockExchangeServer};
use crate::application::dispatcher::{PushHandler, UpdateDispatcher};
use crate::application::session::frames::{DisconnectClass, CLOSE_STALE, ERR_TOKEN_EXPIRED};
use crate::application::session::private_session::{ConnState, PrivateSession, SessionConfig};
use crate::domain::entities::order::{Order, OrderSide, OrderStatus, OrderType, ParentRef};
use crate::domain::errors::SessionError;
use crate::domain::repositories::exchange_rest::{
    AccountBalance, ExchangeRest, PlacedOrder, RestError, RestResult,
};
use crate::persistence::bots::BotRepository;
use crate::persistence::keys::KeyBuilder;
use crate::persistence::orders::OrderRepository;
use crate::persistence::positions::PositionRepository;
use crate::persistence::store::MemoryStore;

const WAIT: Duration = Duration::from_secs(5);

struct StaticRest;

#[async_trait]
impl ExchangeRest for StaticRest {
    async fn place_order(&self, _order: &Order) -> RestResult<PlacedOrder> {
        Err(RestError::Api("not available in tests".to_string()))
    }

    async fn cancel_order(
        &self,
        _pair: &str,
        _exchange_order_id: &str,
        _side: OrderSide,
    ) -> RestResult<()> {
        Err(RestError::Api("not available in tests".to_string()))
    }

    async fn get_balance(&self) -> RestResult<Vec<AccountBalance>> {
        Err(RestError::Api("not available in tests".to_string()))
    }

    async fn generate_token(&self) -> RestResult<String> {
        Ok("test-token".to_string())
    }
}

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl PushHandler for RecordingHandler {
    async fn handle_push(&self, channel: &str, data: Value) {
        self.events.lock().await.push((channel.to_string(), data));
    }
}

fn session_config(server: &MockExchangeServer) -> SessionConfig {
    SessionConfig::new(server.url(), "orders")
}

async fn connected_session(
    server: &MockExchangeServer,
    handler: Arc<dyn PushHandler>,
) -> (
    Arc<PrivateSession>,
    mpsc::UnboundedReceiver<DisconnectClass>,
) {
    let (session, disconnects) =
        PrivateSession::new(session_config(server), Arc::new(StaticRest), handler);
    session.connect().await.expect("connect should succeed");
    (session, disconnects)
}

#[tokio::test]
async fn test_handshake_confirms_auth_and_subscription() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;
    let (session, _disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;

    session
        .wait_for_handshake(WAIT)
        .await
        .expect("handshake should be acknowledged");
    assert_eq!(session.state(), ConnState::Active);
    assert!(session.is_connected());
    assert!(!session.auth_failed());

    session.close().await;
    assert_eq!(session.state(), ConnState::Disconnected);
}

#[tokio::test]
async fn test_connect_while_connected_fails() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;
    let (session, _disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;

    assert!(matches!(
        session.connect().await,
        Err(SessionError::AlreadyConnected)
    ));
    session.close().await;
}

#[tokio::test]
async fn test_auth_rejection_is_terminal() {
    let server = MockExchangeServer::spawn(AuthBehavior::Reject {
        code: 101,
        message: "unauthorized".to_string(),
    })
    .await;
    let (session, mut disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;

    let err = session.wait_for_handshake(WAIT).await.unwrap_err();
    assert!(matches!(err, SessionError::Authentication { code: 101, .. }));

    let class = timeout(WAIT, disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(class, DisconnectClass::AuthFailure);
    assert!(session.auth_failed());
    assert_eq!(session.state(), ConnState::Disconnected);

    session.reset_auth();
    assert!(!session.auth_failed());
}

#[tokio::test]
async fn test_token_expiry_is_stale_not_auth_failure() {
    let server = MockExchangeServer::spawn(AuthBehavior::Reject {
        code: ERR_TOKEN_EXPIRED,
        message: "token expired".to_string(),
    })
    .await;
    let (session, mut disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;

    let err = session.wait_for_handshake(WAIT).await.unwrap_err();
    assert!(matches!(err, SessionError::Stale));

    let class = timeout(WAIT, disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(class, DisconnectClass::Stale);
    assert!(!session.auth_failed());
}

#[tokio::test]
async fn test_stale_close_code_schedules_reconnect() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;
    let (session, mut disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;
    session.wait_for_handshake(WAIT).await.unwrap();

    server.close_with(CLOSE_STALE);

    let class = timeout(WAIT, disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(class, DisconnectClass::Stale);
    assert!(!session.auth_failed());
    assert_eq!(session.state(), ConnState::Disconnected);
}

#[tokio::test]
async fn test_policy_violation_close_marks_auth_failed() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;
    let (session, mut disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;
    session.wait_for_handshake(WAIT).await.unwrap();

    server.close_with(1008);

    let class = timeout(WAIT, disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(class, DisconnectClass::AuthFailure);
    assert!(session.auth_failed());
}

#[tokio::test]
async fn test_push_frames_reach_the_handler() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;
    let handler = Arc::new(RecordingHandler::default());
    let (session, _disconnects) = connected_session(&server, handler.clone()).await;
    session.wait_for_handshake(WAIT).await.unwrap();

    server.push(r#"{"channel": "orders", "data": {"order_id": "7", "pair": "btcidr", "status": "open"}}"#);
    // unknown frames must be dropped without disturbing the session
    server.push(r#"{"something": "else"}"#);
    server.push(r#"{"channel": "orders", "data": {"order_id": "8", "pair": "btcidr", "status": "open"}}"#);

    timeout(WAIT, async {
        loop {
            if handler.events.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both pushes should arrive");
    assert!(session.is_connected());
    session.close().await;
}

#[tokio::test]
async fn test_concurrent_close_is_safe() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;
    let (session, _disconnects) =
        connected_session(&server, Arc::new(RecordingHandler::default())).await;
    session.wait_for_handshake(WAIT).await.unwrap();

    tokio::join!(session.close(), session.close());
    assert_eq!(session.state(), ConnState::Disconnected);

    // closing an already-disconnected session stays a no-op
    session.close().await;
}

#[tokio::test]
async fn test_fill_event_end_to_end() {
    let server = MockExchangeServer::spawn(AuthBehavior::Accept).await;

    let store = Arc::new(MemoryStore::new());
    let keys = KeyBuilder::unprefixed();
    let orders = OrderRepository::new(store.clone(), keys.clone());
    let positions = PositionRepository::new(store.clone(), keys.clone());
    let bots = BotRepository::new(store, keys);
    let dispatcher = Arc::new(UpdateDispatcher::new(
        orders.clone(),
        positions,
        bots,
        Arc::new(crate::application::dispatcher::LogSink),
    ));

    let mut order = Order::new(3, "btcidr", OrderSide::Buy, OrderType::Limit, 650_000_000.0, 0.001)
        .unwrap()
        .with_parent(ParentRef::None);
    order.exchange_order_id = Some("91834".to_string());
    let order = orders.create(order).await.unwrap();

    let (session, _disconnects) = connected_session(&server, dispatcher).await;
    session.wait_for_handshake(WAIT).await.unwrap();

    server.push(
        r#"{"channel": "orders", "data": {"order_id": "91834", "pair": "btcidr", "status": "filled", "filled": "0.001"}}"#,
    );

    timeout(WAIT, async {
        loop {
            let current = orders.get(order.id).await.unwrap();
            if current.status == OrderStatus::Filled {
                assert_eq!(current.filled_amount, 0.001);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the fill should be applied");

    let open = orders.list_by_status(OrderStatus::Open, 10).await.unwrap();
    assert!(open.is_empty());
    session.close().await;
}
