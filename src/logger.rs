use crate::config;
use crate::peer::types::{IceCandidate, SessionDescription};
use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

static INIT: OnceCell<()> = OnceCell::new();

/// Логирование с временными метками; повторные вызовы ничего не делают
pub fn init() {
    if !config::logging_enabled() {
        return;
    }
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
            .with_target(false)
            .try_init();
    });
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        label,
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        "trickle candidate"
    );
}

pub fn dump_description(label: &str, desc: &SessionDescription) {
    debug!(label, kind = ?desc.kind, bytes = desc.sdp.len(), "session description");
}
