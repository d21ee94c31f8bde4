//! Proptest generators for property-based testing.

use proptest::collection::btree_map;
use proptest::prelude::*;

use bunker_core::{method, EventTemplate, Keys, PublicKey, RequestMessage};
use bunker_perms::{InviteToken, PermissionPolicy, Profile};

/// Generate a random keypair.
pub fn keys() -> impl Strategy<Value = Keys> {
    any::<[u8; 32]>().prop_filter_map("valid secp256k1 secret", |seed| {
        Keys::from_secret_hex(&hex::encode(seed)).ok()
    })
}

/// Generate a random public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keys().prop_map(|k| k.public_key())
}

/// Generate a protocol method name.
pub fn method_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(method::CONNECT),
        Just(method::GET_PUBLIC_KEY),
        Just(method::SIGN_EVENT),
        Just(method::PING),
        Just(method::NIP04_ENCRYPT),
        Just(method::NIP04_DECRYPT),
        Just(method::NIP44_ENCRYPT),
        Just(method::NIP44_DECRYPT),
    ]
}

/// Generate an event kind.
pub fn event_kind() -> impl Strategy<Value = u16> {
    any::<u16>()
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate an event template with printable content.
pub fn event_template() -> impl Strategy<Value = EventTemplate> {
    (timestamp(), event_kind(), "[ -~]{0,64}").prop_map(|(created_at, kind, content)| {
        EventTemplate::new(created_at, kind, content)
    })
}

/// Generate a permission policy with a handful of explicit rules.
pub fn policy() -> impl Strategy<Value = PermissionPolicy> {
    (
        btree_map(method_name().prop_map(String::from), any::<bool>(), 0..4),
        btree_map(event_kind(), any::<bool>(), 0..4),
    )
        .prop_map(|(methods, kinds)| PermissionPolicy { methods, kinds })
}

/// Generate a policy of grants only, the shape that travels in `perms=`
/// URL parameters (denies stay local and never encode).
pub fn grant_policy() -> impl Strategy<Value = PermissionPolicy> {
    (
        btree_map(method_name().prop_map(String::from), Just(true), 0..4),
        btree_map(event_kind(), Just(true), 0..4),
    )
        .prop_map(|(methods, kinds)| PermissionPolicy { methods, kinds })
}

/// Generate a relay URL.
pub fn relay_url() -> impl Strategy<Value = String> {
    "[a-z]{3,8}".prop_map(|host| format!("wss://{host}.example"))
}

/// Generate an invite secret.
pub fn secret() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}".prop_map(String::from)
}

/// Generate an invite token that satisfies the URI codec's requirements
/// (at least one relay, non-empty secret).
pub fn invite_token() -> impl Strategy<Value = InviteToken> {
    (
        public_key(),
        prop::collection::vec(relay_url(), 1..4),
        grant_policy(),
        prop::option::of("[a-z]{1,12}"),
        secret(),
    )
        .prop_map(|(pubkey, relays, policy, name, secret)| InviteToken {
            pubkey,
            relays,
            policy,
            profile: Profile {
                name,
                ..Profile::default()
            },
            secret,
        })
}

/// Generate a request message.
pub fn request_message() -> impl Strategy<Value = RequestMessage> {
    (
        method_name(),
        prop::collection::vec("[ -~]{0,32}", 0..3),
    )
        .prop_map(|(name, params)| RequestMessage::new(name, params))
}
