//! Permission policy and the decision function.
//!
//! A policy is a pair of explicit rule maps. Absence of a key means "no
//! explicit rule"; the decision function then defers to interactive
//! approval. Presence of `true`/`false` is an authoritative allow/deny.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bunker_core::method;

/// Explicit allow/deny rules, keyed by method name and (for signing) by
/// numeric event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    #[serde(default)]
    pub methods: BTreeMap<String, bool>,
    #[serde(default)]
    pub kinds: BTreeMap<u16, bool>,
}

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Explicitly allowed; no interaction needed.
    Allow,
    /// Explicitly denied; the request never reaches the user.
    Deny,
    /// No explicit rule; ask for interactive approval.
    Ask,
}

impl PermissionPolicy {
    /// Allow a method.
    pub fn allow_method(mut self, name: impl Into<String>) -> Self {
        self.methods.insert(name.into(), true);
        self
    }

    /// Deny a method.
    pub fn deny_method(mut self, name: impl Into<String>) -> Self {
        self.methods.insert(name.into(), false);
        self
    }

    /// Allow signing a specific event kind.
    pub fn allow_kind(mut self, kind: u16) -> Self {
        self.kinds.insert(kind, true);
        self
    }

    /// Deny signing a specific event kind.
    pub fn deny_kind(mut self, kind: u16) -> Self {
        self.kinds.insert(kind, false);
        self
    }

    /// Structural merge: per-key overwrite of rules present in `changes`,
    /// keys absent from `changes` are untouched. Pure; callers apply the
    /// result through the session manager.
    pub fn merge(&self, changes: &PermissionPolicy) -> PermissionPolicy {
        let mut next = self.clone();
        for (name, allowed) in &changes.methods {
            next.methods.insert(name.clone(), *allowed);
        }
        for (kind, allowed) in &changes.kinds {
            next.kinds.insert(*kind, *allowed);
        }
        next
    }
}

/// Decide whether a request may proceed without interactive approval.
///
/// Pure function of `(method, params, policy)`:
///
/// 1. an explicit method deny wins outright;
/// 2. `sign_event` is refined by the event kind extracted from the request
///    template, with its own explicit allow/deny rules;
/// 3. no explicit rule means `Ask`.
pub fn check(request_method: &str, params: &[String], policy: &PermissionPolicy) -> Decision {
    if policy.methods.get(request_method) == Some(&false) {
        return Decision::Deny;
    }

    if request_method == method::SIGN_EVENT {
        return match sign_event_kind(params) {
            Some(kind) => match policy.kinds.get(&kind) {
                Some(false) => Decision::Deny,
                Some(true) => Decision::Allow,
                None => Decision::Ask,
            },
            // No extractable kind: never auto-allow a blind signature.
            None => Decision::Ask,
        };
    }

    match policy.methods.get(request_method) {
        Some(true) => Decision::Allow,
        Some(false) => Decision::Deny,
        None => Decision::Ask,
    }
}

/// Extract the event kind from a `sign_event` request.
///
/// The template is a single JSON object in `params[0]`; only its top-level
/// `kind` field is consulted. Nested or array shapes yield `None`.
pub fn sign_event_kind(params: &[String]) -> Option<u16> {
    let template: serde_json::Value = serde_json::from_str(params.first()?).ok()?;
    template.as_object()?.get("kind")?.as_u64()?.try_into().ok()
}
