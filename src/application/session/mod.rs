pub mod frames;
pub mod private_session;
pub mod public_session;
pub mod supervisor;

#[cfg(test)]
pub mod tests;

pub use frames::DisconnectClass;
pub use private_session::{ConnState, PrivateSession, SessionConfig};
pub use public_session::{MarketEvent, PublicConfig, PublicSession};
pub use supervisor::{Backoff, BackoffPolicy, Reconnectable, ReconnectionSupervisor};
