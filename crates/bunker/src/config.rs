//! Engine configuration.
//!
//! Every timing window and the default policy are explicit construction
//! inputs. There is no global default policy; callers decide what a fresh
//! session may do.

use std::time::Duration;

use bunker_perms::PermissionPolicy;
use bunker_transport::SocketConfig;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relays to subscribe and publish on.
    pub relays: Vec<String>,
    /// How long a queued permission request waits for a decision before it
    /// is denied with "request timed out".
    pub request_timeout: Duration,
    /// How long an invite stays open without being joined.
    pub invite_timeout: Duration,
    /// How long a pending session waits for the activating handshake.
    pub pending_session_timeout: Duration,
    /// How long `subscribe` waits for the relay subscription to go live.
    pub subscribe_timeout: Duration,
    /// Policy applied to sessions created without explicit terms.
    pub default_policy: PermissionPolicy,
}

impl EngineConfig {
    /// The socket-level slice of this configuration.
    pub fn socket(&self) -> SocketConfig {
        SocketConfig {
            subscribe_timeout: self.subscribe_timeout,
            request_timeout: self.request_timeout,
        }
    }
}
