//! Connection URI codecs.
//!
//! Two URL shapes carry connection offers out of band:
//!
//! - `nostrconnect://<pubkey>?relay=<url>&...&secret=<s>[&name=&url=&image=&perms=]`
//!   is an invitation issued by this side;
//! - `bunker://<pubkey>?relay=<url>&...&secret=<s>` points at a running
//!   signer.
//!
//! Both require at least one relay and a non-empty secret, encoding and
//! decoding alike.

use url::Url;

use bunker_core::{method, PublicKey};

use crate::error::{PermsError, Result};
use crate::policy::PermissionPolicy;
use crate::token::{InviteToken, Profile};

/// A decoded `bunker://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunkerToken {
    pub pubkey: PublicKey,
    pub relays: Vec<String>,
    pub secret: String,
}

/// Render an invite as a `nostrconnect://` URL.
pub fn encode_invite(token: &InviteToken) -> Result<String> {
    if token.relays.is_empty() {
        return Err(PermsError::MissingRelays);
    }
    if token.secret.is_empty() {
        return Err(PermsError::MissingSecret);
    }

    let mut url = Url::parse(&format!("nostrconnect://{}", token.pubkey.to_hex()))
        .map_err(|e| PermsError::InvalidUri(e.to_string()))?;
    {
        let mut pairs = url.query_pairs_mut();
        for relay in &token.relays {
            pairs.append_pair("relay", relay);
        }
        pairs.append_pair("secret", &token.secret);
        if let Some(name) = &token.profile.name {
            pairs.append_pair("name", name);
        }
        if let Some(site) = &token.profile.url {
            pairs.append_pair("url", site);
        }
        if let Some(image) = &token.profile.image {
            pairs.append_pair("image", image);
        }
        let perms = encode_perms(&token.policy);
        if !perms.is_empty() {
            pairs.append_pair("perms", &perms);
        }
    }
    Ok(url.to_string())
}

/// Parse a `nostrconnect://` URL back into an invite.
pub fn decode_invite(input: &str) -> Result<InviteToken> {
    let (pubkey, query) = parse_connection_url(input, "nostrconnect")?;

    let mut relays = Vec::new();
    let mut secret = String::new();
    let mut profile = Profile::default();
    let mut policy = PermissionPolicy::default();
    for (key, value) in query {
        match key.as_str() {
            "relay" => relays.push(value),
            "secret" => secret = value,
            "name" => profile.name = Some(value),
            "url" => profile.url = Some(value),
            "image" => profile.image = Some(value),
            "perms" => policy = parse_perms(&value),
            _ => {}
        }
    }

    if relays.is_empty() {
        return Err(PermsError::MissingRelays);
    }
    if secret.is_empty() {
        return Err(PermsError::MissingSecret);
    }

    Ok(InviteToken {
        pubkey,
        relays,
        policy,
        profile,
        secret,
    })
}

/// Render a `bunker://` URL pointing at a running signer.
pub fn encode_bunker(token: &BunkerToken) -> Result<String> {
    if token.relays.is_empty() {
        return Err(PermsError::MissingRelays);
    }
    if token.secret.is_empty() {
        return Err(PermsError::MissingSecret);
    }

    let mut url = Url::parse(&format!("bunker://{}", token.pubkey.to_hex()))
        .map_err(|e| PermsError::InvalidUri(e.to_string()))?;
    {
        let mut pairs = url.query_pairs_mut();
        for relay in &token.relays {
            pairs.append_pair("relay", relay);
        }
        pairs.append_pair("secret", &token.secret);
    }
    Ok(url.to_string())
}

/// Parse a `bunker://` URL.
pub fn decode_bunker(input: &str) -> Result<BunkerToken> {
    let (pubkey, query) = parse_connection_url(input, "bunker")?;

    let mut relays = Vec::new();
    let mut secret = String::new();
    for (key, value) in query {
        match key.as_str() {
            "relay" => relays.push(value),
            "secret" => secret = value,
            _ => {}
        }
    }

    if relays.is_empty() {
        return Err(PermsError::MissingRelays);
    }
    if secret.is_empty() {
        return Err(PermsError::MissingSecret);
    }

    Ok(BunkerToken {
        pubkey,
        relays,
        secret,
    })
}

fn parse_connection_url(input: &str, scheme: &str) -> Result<(PublicKey, Vec<(String, String)>)> {
    let url = Url::parse(input).map_err(|e| PermsError::InvalidUri(e.to_string()))?;
    if url.scheme() != scheme {
        return Err(PermsError::InvalidUri(format!(
            "expected {scheme}:// URL, got {}://",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| PermsError::InvalidUri("missing pubkey".into()))?;
    let pubkey = PublicKey::from_hex(host)?;
    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok((pubkey, query))
}

/// Encode granted permissions as comma-separated `key` or `key:value`
/// tokens. Only grants travel in URLs; explicit denies stay local.
pub fn encode_perms(policy: &PermissionPolicy) -> String {
    let mut tokens: Vec<String> = policy
        .methods
        .iter()
        .filter(|(_, allowed)| **allowed)
        .map(|(name, _)| name.clone())
        .collect();
    tokens.extend(
        policy
            .kinds
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(kind, _)| format!("{}:{}", method::SIGN_EVENT, kind)),
    );
    tokens.join(",")
}

/// Parse a `perms=` list into a policy of grants.
///
/// `sign_event:<kind>` grants that numeric kind; any other token grants its
/// method. Unparseable entries are skipped.
pub fn parse_perms(input: &str) -> PermissionPolicy {
    let mut policy = PermissionPolicy::default();
    for token in input.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some((name, value)) = token.split_once(':') {
            if name == method::SIGN_EVENT {
                if let Ok(kind) = value.parse::<u16>() {
                    policy.kinds.insert(kind, true);
                }
            } else if !name.is_empty() {
                policy.methods.insert(name.into(), true);
            }
        } else {
            policy.methods.insert(token.into(), true);
        }
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> InviteToken {
        InviteToken {
            pubkey: PublicKey::from_bytes([0x11; 32]),
            relays: vec!["wss://relay.one".into(), "wss://relay.two".into()],
            policy: PermissionPolicy::default()
                .allow_method(method::NIP04_ENCRYPT)
                .allow_kind(1),
            profile: Profile {
                name: Some("demo app".into()),
                url: Some("https://example.com".into()),
                image: None,
            },
            secret: "0123abcd".into(),
        }
    }

    #[test]
    fn test_invite_roundtrip() {
        let original = invite();
        let encoded = encode_invite(&original).unwrap();
        assert!(encoded.starts_with("nostrconnect://"));
        let decoded = decode_invite(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_invite_requires_relays_and_secret() {
        let mut no_relays = invite();
        no_relays.relays.clear();
        assert!(matches!(
            encode_invite(&no_relays),
            Err(PermsError::MissingRelays)
        ));

        let mut no_secret = invite();
        no_secret.secret.clear();
        assert!(matches!(
            encode_invite(&no_secret),
            Err(PermsError::MissingSecret)
        ));
    }

    #[test]
    fn test_decode_requires_relays_and_secret() {
        let pubkey = "11".repeat(32);
        assert!(matches!(
            decode_invite(&format!("nostrconnect://{pubkey}?secret=s")),
            Err(PermsError::MissingRelays)
        ));
        assert!(matches!(
            decode_invite(&format!("nostrconnect://{pubkey}?relay=wss%3A%2F%2Fr")),
            Err(PermsError::MissingSecret)
        ));
    }

    #[test]
    fn test_bunker_roundtrip() {
        let token = BunkerToken {
            pubkey: PublicKey::from_bytes([0x22; 32]),
            relays: vec!["wss://relay.one".into()],
            secret: "s3cret".into(),
        };
        let encoded = encode_bunker(&token).unwrap();
        assert!(encoded.starts_with("bunker://"));
        assert_eq!(decode_bunker(&encoded).unwrap(), token);
    }

    #[test]
    fn test_wrong_scheme_rejected() {
        let pubkey = "11".repeat(32);
        let url = format!("http://{pubkey}?relay=wss%3A%2F%2Fr&secret=s");
        assert!(matches!(
            decode_invite(&url),
            Err(PermsError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_perms_roundtrip() {
        let policy = PermissionPolicy::default()
            .allow_method(method::PING)
            .allow_kind(1)
            .allow_kind(30023);
        let encoded = encode_perms(&policy);
        assert_eq!(encoded, "ping,sign_event:1,sign_event:30023");
        assert_eq!(parse_perms(&encoded), policy);
    }

    #[test]
    fn test_parse_perms_skips_garbage() {
        let policy = parse_perms("sign_event:notanumber,,ping, sign_event:7 ");
        assert!(policy.kinds.get(&7).copied().unwrap_or(false));
        assert!(policy.methods.get("ping").copied().unwrap_or(false));
        assert!(!policy.kinds.contains_key(&0));
    }
}
