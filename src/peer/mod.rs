pub mod connection;
pub mod ice;
pub mod media;
/// Тестовый двойник `Transport`
pub mod mock;
pub mod state;
pub mod types;

pub use connection::{Transport, TransportEvent, TransportEvents, WebRtcTransport};
pub use media::{MediaCapability, MediaConstraints, MediaStream, TrackMedia};
pub use state::{ConnectionState, DescriptionState, Role, TransportState};
pub use types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
