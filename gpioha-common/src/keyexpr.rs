//! Key expression builders.
//!
//! All bridge traffic lives under a configurable prefix:
//!
//! - `<prefix>/<identity>/state` - entity state updates (plain UTF-8 payload)
//! - `<prefix>/<identity>/set` - inbound commands (switch entities only)
//! - `<prefix>/@/discovery/<identity>` - entity announcement metadata
//! - `<prefix>/@/entities/<identity>/alive` - per-entity liveliness token
//! - `<prefix>/@/alive` - bridge-level liveliness token
//! - `<prefix>/@/status` - bridge status (running/offline)
//!
//! The `@` segment marks administrative channels, keeping them out of the
//! state namespace so a `<prefix>/*/state` subscriber never sees them.

/// Key expression for an entity's state channel.
pub fn state_key(prefix: &str, identity: &str) -> String {
    format!("{}/{}/state", prefix, identity)
}

/// Key expression for an entity's command channel.
pub fn command_key(prefix: &str, identity: &str) -> String {
    format!("{}/{}/set", prefix, identity)
}

/// Wildcard matching the command channels of every entity under a prefix.
pub fn command_wildcard(prefix: &str) -> String {
    format!("{}/*/set", prefix)
}

/// Key expression for an entity's discovery announcement.
pub fn discovery_key(prefix: &str, identity: &str) -> String {
    format!("{}/@/discovery/{}", prefix, identity)
}

/// Key expression for an entity's liveliness token.
pub fn entity_alive_key(prefix: &str, identity: &str) -> String {
    format!("{}/@/entities/{}/alive", prefix, identity)
}

/// Key expression for the bridge-level liveliness token.
pub fn bridge_alive_key(prefix: &str) -> String {
    format!("{}/@/alive", prefix)
}

/// Key expression for the bridge status channel.
pub fn status_key(prefix: &str) -> String {
    format!("{}/@/status", prefix)
}

/// Extract the entity identity from a command key expression.
///
/// Returns `None` if the key does not have the `<prefix>/<identity>/set`
/// shape or the identity segment is empty.
pub fn identity_from_command_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let identity = rest.strip_suffix("/set")?;
    if identity.is_empty() || identity.contains('/') {
        None
    } else {
        Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_and_command_keys() {
        assert_eq!(state_key("gpioha", "RELAY1"), "gpioha/RELAY1/state");
        assert_eq!(command_key("gpioha", "RELAY1"), "gpioha/RELAY1/set");
        assert_eq!(command_wildcard("gpioha"), "gpioha/*/set");
    }

    #[test]
    fn test_admin_keys() {
        assert_eq!(discovery_key("gpioha", "ups"), "gpioha/@/discovery/ups");
        assert_eq!(
            entity_alive_key("gpioha", "ups"),
            "gpioha/@/entities/ups/alive"
        );
        assert_eq!(bridge_alive_key("gpioha"), "gpioha/@/alive");
        assert_eq!(status_key("gpioha"), "gpioha/@/status");
    }

    #[test]
    fn test_identity_from_command_key() {
        assert_eq!(
            identity_from_command_key("gpioha", "gpioha/RELAY1/set"),
            Some("RELAY1")
        );
        assert_eq!(
            identity_from_command_key("home/gpio", "home/gpio/LED_R/set"),
            Some("LED_R")
        );
        assert_eq!(identity_from_command_key("gpioha", "gpioha/RELAY1/state"), None);
        assert_eq!(identity_from_command_key("gpioha", "other/RELAY1/set"), None);
        assert_eq!(identity_from_command_key("gpioha", "gpioha//set"), None);
        // Nested segments are not valid identities
        assert_eq!(identity_from_command_key("gpioha", "gpioha/a/b/set"), None);
    }
}
