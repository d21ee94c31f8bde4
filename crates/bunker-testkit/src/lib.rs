//! # bunker-testkit
//!
//! Testing utilities for the bunker engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a running engine on an in-memory relay network with
//!   short timers
//! - **Scripted clients**: the application side of the protocol, with
//!   configurable challenge behavior
//! - **Generators**: proptest strategies for keys, policies, templates,
//!   and tokens
//!
//! ## Fixtures
//!
//! ```rust,ignore
//! use bunker_testkit::{ChallengeBehavior, TestFixture};
//!
//! let fixture = TestFixture::start().await;
//! let client = fixture.client(ChallengeBehavior::Answer).await;
//! let invite = fixture.engine.create_invite(Default::default(), Default::default());
//! client.accept_invite(&invite.secret).await.unwrap();
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use bunker_testkit::generators;
//!
//! proptest! {
//!     #[test]
//!     fn policy_check_is_total(policy in generators::policy()) {
//!         // ...
//!     }
//! }
//! ```

pub mod client;
pub mod fixtures;
pub mod generators;

pub use client::{ChallengeBehavior, RemoteClient};
pub use fixtures::{short_config, TestFixture, TEST_RELAY};
