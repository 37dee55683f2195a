// Конфигурация согласования и логирования
use crate::peer::types::ServerConfig;
use crate::glare::{PeerIdOrder, TieBreaker};
use std::sync::Arc;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене включается через RTC_NEGOTIATOR_LOG

/// Переменная окружения, включающая логирование в release-сборке
pub const LOG_ENV: &str = "RTC_NEGOTIATOR_LOG";

/// Переменная окружения: работать без STUN/TURN (только host-кандидаты)
pub const LOCALHOST_ONLY_ENV: &str = "RTC_NEGOTIATOR_LOCALHOST_ONLY";

pub fn logging_enabled() -> bool {
    LOGGING_ENABLED || std::env::var_os(LOG_ENV).is_some()
}

/// Настройки одного участника звонка
#[derive(Clone, Default)]
pub struct NegotiatorConfig {
    /// Метка участника для логов
    pub label: Option<String>,
    /// Политика разрешения glare; без неё встречный offer даёт `GlareUnresolved`
    pub tie_breaker: Option<Arc<dyn TieBreaker>>,
}

impl NegotiatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_tie_breaker(mut self, tie_breaker: Arc<dyn TieBreaker>) -> Self {
        self.tie_breaker = Some(tie_breaker);
        self
    }

    /// Glare решается сравнением id участников
    pub fn with_peer_ids(self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.with_tie_breaker(Arc::new(PeerIdOrder::new(local, remote)))
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("peer")
    }
}

impl std::fmt::Debug for NegotiatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatorConfig")
            .field("label", &self.label)
            .field("tie_breaker", &self.tie_breaker.is_some())
            .finish()
    }
}

/// ICE серверы по умолчанию
pub fn default_ice_servers() -> Vec<ServerConfig> {
    if std::env::var_os(LOCALHOST_ONLY_ENV).is_some() {
        return Vec::new();
    }
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
