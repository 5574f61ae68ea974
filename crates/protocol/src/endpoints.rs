//! Relay endpoint configuration and URL building.

/// Origin used when [`ORIGIN_ENV`] is unset.
pub const DEFAULT_ORIGIN: &str = "ws://127.0.0.1:8080";

/// Environment variable overriding the relay origin.
pub const ORIGIN_ENV: &str = "HANDOFF_RELAY_ORIGIN";

/// Location of the relay every channel connects to.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    origin: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN)
    }
}

impl RelayConfig {
    /// Creates a config for the given origin, e.g. `wss://relay.example.org`.
    pub fn new(origin: impl Into<String>) -> Self {
        let mut origin = origin.into();
        while origin.ends_with('/') {
            origin.pop();
        }
        Self { origin }
    }

    /// Reads the origin from [`ORIGIN_ENV`], falling back to
    /// [`DEFAULT_ORIGIN`].
    pub fn from_env() -> Self {
        match std::env::var(ORIGIN_ENV) {
            Ok(origin) if !origin.is_empty() => Self::new(origin),
            _ => Self::default(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Room control endpoint. An empty alias lets the relay assign one.
    pub fn room_url(&self, room_id: &str, alias: &str) -> String {
        if alias.is_empty() {
            format!("{}/room/{room_id}", self.origin)
        } else {
            format!("{}/room/{room_id}?alias={alias}", self.origin)
        }
    }

    /// Transaction control endpoint, tagged with the caller's role.
    pub fn transaction_url(&self, transaction_id: &str, sender: bool) -> String {
        format!("{}/transaction/{transaction_id}?sender={sender}", self.origin)
    }

    /// Transaction binary endpoint, tagged with the caller's role.
    pub fn transaction_binary_url(&self, transaction_id: &str, sender: bool) -> String {
        format!(
            "{}/transaction/{transaction_id}/bin?sender={sender}",
            self.origin
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_url_with_alias() {
        let config = RelayConfig::new("wss://relay.example.org");
        assert_eq!(
            config.room_url("room-1", "ada"),
            "wss://relay.example.org/room/room-1?alias=ada"
        );
    }

    #[test]
    fn room_url_without_alias_omits_query() {
        let config = RelayConfig::new("wss://relay.example.org");
        assert_eq!(
            config.room_url("room-1", ""),
            "wss://relay.example.org/room/room-1"
        );
    }

    #[test]
    fn transaction_urls_carry_role() {
        let config = RelayConfig::new("ws://localhost:9000/");
        assert_eq!(
            config.transaction_url("t-9", true),
            "ws://localhost:9000/transaction/t-9?sender=true"
        );
        assert_eq!(
            config.transaction_binary_url("t-9", false),
            "ws://localhost:9000/transaction/t-9/bin?sender=false"
        );
    }

    #[test]
    fn trailing_slashes_trimmed() {
        let config = RelayConfig::new("ws://relay//");
        assert_eq!(config.origin(), "ws://relay");
    }
}
