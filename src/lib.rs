pub mod config;
pub mod error;
pub mod glare;
pub mod logger;
pub mod negotiator;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::NegotiatorConfig;
pub use error::{NegotiationError, Result};
pub use glare::{FixedPriority, PeerIdOrder, TieBreaker};
pub use negotiator::{Negotiator, SessionEvent, SessionEvents, SessionSnapshot};
pub use relay::{drive_session, LoopbackChannel};
pub use signaling::{decode, encode, MessageType, SignalingChannel, SignalingMessage};
