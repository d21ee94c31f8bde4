//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: an in-memory relay network, an
//! engine with short timers, and scripted clients pointed at it. Fixture
//! constructors panic on failure; they run inside tests.

use std::sync::Arc;
use std::time::Duration;

use bunker::{Engine, EngineConfig, PermissionPolicy};
use bunker_transport::{LocalSigner, MemoryRelayNetwork};

use crate::client::{ChallengeBehavior, RemoteClient};

/// The relay name every fixture runs on.
pub const TEST_RELAY: &str = "wss://relay.test";

/// An engine configuration with timers short enough for tests.
pub fn short_config() -> EngineConfig {
    EngineConfig {
        relays: vec![TEST_RELAY.into()],
        request_timeout: Duration::from_millis(250),
        invite_timeout: Duration::from_millis(250),
        pending_session_timeout: Duration::from_millis(250),
        subscribe_timeout: Duration::from_millis(500),
        default_policy: PermissionPolicy::default(),
    }
}

/// Route engine logs through the test harness capture. Safe to call from
/// every fixture; only the first call installs the subscriber.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A running engine on an in-memory relay network.
pub struct TestFixture {
    pub network: Arc<MemoryRelayNetwork>,
    pub engine: Arc<Engine>,
}

impl TestFixture {
    /// Start an engine with [`short_config`] timers.
    pub async fn start() -> Self {
        Self::with_config(short_config()).await
    }

    /// Start an engine with explicit configuration. `config.relays` are
    /// created live on the network.
    pub async fn with_config(config: EngineConfig) -> Self {
        init_logging();
        let network = MemoryRelayNetwork::new(config.relays.iter().cloned());
        let signer = Arc::new(LocalSigner::generate().expect("signer generation failed"));
        let engine = Engine::start(signer, network.clone(), config)
            .await
            .expect("engine start failed");
        Self { network, engine }
    }

    /// Connect a fresh scripted client to this engine.
    pub async fn client(&self, behavior: ChallengeBehavior) -> RemoteClient {
        RemoteClient::connect(
            self.network.clone(),
            &[TEST_RELAY.to_string()],
            self.engine.local_key(),
            behavior,
        )
        .await
        .expect("client connect failed")
    }
}
