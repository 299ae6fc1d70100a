// Integration tests for the feed sessions, run against an in-process
// WebSocket server speaking the exchange's frame shapes.

pub mod private_session_tests;

pub use mock_exchange_server::{AuthBehavior, MockExchangeServer};
