//! The permission request queue.
//!
//! Inbound protocol requests wait here for a decision. Policy denies never
//! enter the queue; everything else is timer-protected and resolves exactly
//! once, whether by an explicit decision, a bulk decision, or the timer.
//!
//! `approve`/`deny` are internal decisions. `resolve`/`reject` additionally
//! answer the peer on the wire, so a caller can batch policy changes before
//! notifying anyone.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use bunker_core::{method, AcceptMessage, Bus, CoreError, Message, PublicKey, RejectMessage};
use bunker_perms::{check, sign_event_kind, Decision, PermissionPolicy};
use bunker_transport::{CipherScheme, Signer, Socket};

use crate::error::{EngineError, Result};
use crate::session::SessionManager;

/// Reason string sent when the policy denies outright.
pub const REASON_POLICY: &str = "permission denied via policy check";
/// Reason string sent when a queued request times out.
pub const REASON_TIMEOUT: &str = "request timed out";

/// An inbound request awaiting a decision.
///
/// Ephemeral: exists only between arrival and resolution, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    /// Wire correlation id.
    pub id: String,
    /// Requested method.
    pub method: String,
    /// Raw request parameters.
    pub params: Vec<String>,
    /// The peer whose session this request belongs to.
    pub session: PublicKey,
    /// Arrival time, Unix seconds.
    pub stamp: i64,
}

/// Queue transitions.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// No explicit rule; an interactive decision is needed.
    Prompt(PermissionRequest),
    /// The request was approved (by policy, decision, or bulk decision).
    Approved(PermissionRequest),
    /// The request was denied, with the reason sent to the peer.
    Denied {
        request: PermissionRequest,
        reason: String,
    },
}

struct Entry {
    request: PermissionRequest,
    scheme: CipherScheme,
    /// `Approved` was already announced at arrival (policy allow).
    announced: bool,
    timer: JoinHandle<()>,
}

/// Holds in-flight requests and their timers.
pub struct RequestQueue {
    entries: Mutex<HashMap<String, Entry>>,
    bus: Bus<QueueEvent>,
    sessions: Arc<SessionManager>,
    socket: Arc<Socket>,
    signer: Arc<dyn Signer>,
    timeout: Duration,
}

impl RequestQueue {
    pub fn new(
        sessions: Arc<SessionManager>,
        socket: Arc<Socket>,
        signer: Arc<dyn Signer>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            bus: Bus::default(),
            sessions,
            socket,
            signer,
            timeout,
        })
    }

    /// Observe queue transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }

    /// Apply the policy to an arriving request.
    ///
    /// Deny answers the peer immediately and never queues. Allow queues and
    /// announces `Approved` (the timer stays armed in case nothing follows).
    /// Ask queues and announces `Prompt`. Returns the decision so the caller
    /// can act on an allow.
    pub async fn submit(
        self: &Arc<Self>,
        request: PermissionRequest,
        scheme: CipherScheme,
        policy: &PermissionPolicy,
    ) -> Decision {
        let decision = check(&request.method, &request.params, policy);
        if decision == Decision::Deny {
            self.answer_reject(&request, scheme, REASON_POLICY).await;
            self.bus.emit(QueueEvent::Denied {
                request,
                reason: REASON_POLICY.into(),
            });
            return decision;
        }

        let id = request.id.clone();
        let timer = {
            let queue = Arc::clone(self);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(queue.timeout).await;
                queue.expire(&id).await;
            })
        };

        let announced = decision == Decision::Allow;
        let mut entries = lock(&self.entries);
        // Same id twice is a peer error; last registration wins.
        if let Some(old) = entries.insert(
            id,
            Entry {
                request: request.clone(),
                scheme,
                announced,
                timer,
            },
        ) {
            old.timer.abort();
        }
        drop(entries);

        match decision {
            Decision::Allow => self.bus.emit(QueueEvent::Approved(request)),
            Decision::Ask => self.bus.emit(QueueEvent::Prompt(request)),
            Decision::Deny => unreachable!("deny handled above"),
        }
        decision
    }

    /// Snapshot of the queued requests.
    pub fn snapshot(&self) -> Vec<PermissionRequest> {
        let mut requests: Vec<_> = lock(&self.entries)
            .values()
            .map(|e| e.request.clone())
            .collect();
        requests.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.id.cmp(&b.id)));
        requests
    }

    /// A queued request by id.
    pub fn request(&self, id: &str) -> Option<PermissionRequest> {
        lock(&self.entries).get(id).map(|e| e.request.clone())
    }

    /// Approve internally: remove, clear the timer, fold optional policy
    /// changes into the owning session, announce `Approved` exactly once.
    pub fn approve(
        &self,
        id: &str,
        changes: Option<&PermissionPolicy>,
    ) -> Result<PermissionRequest> {
        let entry = self
            .take(id)
            .ok_or_else(|| EngineError::UnknownRequest(id.to_string()))?;
        self.fold_changes(&entry.request, changes);
        if !entry.announced {
            self.bus.emit(QueueEvent::Approved(entry.request.clone()));
        }
        Ok(entry.request)
    }

    /// Deny internally, with the same removal semantics as `approve`.
    pub fn deny(
        &self,
        id: &str,
        reason: &str,
        changes: Option<&PermissionPolicy>,
    ) -> Result<PermissionRequest> {
        let entry = self
            .take(id)
            .ok_or_else(|| EngineError::UnknownRequest(id.to_string()))?;
        self.fold_changes(&entry.request, changes);
        self.bus.emit(QueueEvent::Denied {
            request: entry.request.clone(),
            reason: reason.to_string(),
        });
        Ok(entry.request)
    }

    /// Approve, execute the method against the signer capability, and send
    /// the protocol accept to the peer.
    pub async fn resolve(&self, id: &str, changes: Option<&PermissionPolicy>) -> Result<()> {
        let entry = self
            .take(id)
            .ok_or_else(|| EngineError::UnknownRequest(id.to_string()))?;
        self.fold_changes(&entry.request, changes);

        match self.execute(&entry.request).await {
            Ok(result) => {
                let accept = Message::Accept(AcceptMessage {
                    id: entry.request.id.clone(),
                    result,
                });
                self.socket
                    .send(&accept, &entry.request.session, entry.scheme, None)
                    .await?;
                if !entry.announced {
                    self.bus.emit(QueueEvent::Approved(entry.request));
                }
                Ok(())
            }
            Err(e) => {
                self.answer_reject(&entry.request, entry.scheme, "unable to fulfil request")
                    .await;
                self.bus.emit(QueueEvent::Denied {
                    request: entry.request,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Deny and send the protocol reject to the peer.
    pub async fn reject(
        &self,
        id: &str,
        reason: &str,
        changes: Option<&PermissionPolicy>,
    ) -> Result<()> {
        let entry = self
            .take(id)
            .ok_or_else(|| EngineError::UnknownRequest(id.to_string()))?;
        self.fold_changes(&entry.request, changes);
        let reject = Message::Reject(RejectMessage {
            id: entry.request.id.clone(),
            error: reason.to_string(),
        });
        self.socket
            .send(&reject, &entry.request.session, entry.scheme, None)
            .await?;
        self.bus.emit(QueueEvent::Denied {
            request: entry.request,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Approve every queued request with this method, after granting the
    /// method in each owning session's policy.
    pub fn approve_all_method(&self, name: &str) -> Vec<PermissionRequest> {
        let matched = self.drain(|req| req.method == name);
        let grant = PermissionPolicy::default().allow_method(name);
        self.finish_bulk(matched, &grant, None)
    }

    /// Deny every queued request with this method, revoking it in each
    /// owning session's policy.
    pub fn deny_all_method(&self, name: &str, reason: &str) -> Vec<PermissionRequest> {
        let matched = self.drain(|req| req.method == name);
        let change = PermissionPolicy::default().deny_method(name);
        self.finish_bulk(matched, &change, Some(reason))
    }

    /// Approve every queued `sign_event` request for this kind, after
    /// granting the kind in each owning session's policy.
    pub fn approve_all_kinds(&self, kind: u16) -> Vec<PermissionRequest> {
        let matched = self.drain(|req| {
            req.method == method::SIGN_EVENT && sign_event_kind(&req.params) == Some(kind)
        });
        let grant = PermissionPolicy::default().allow_kind(kind);
        self.finish_bulk(matched, &grant, None)
    }

    /// Deny every queued `sign_event` request for this kind.
    pub fn deny_all_kinds(&self, kind: u16, reason: &str) -> Vec<PermissionRequest> {
        let matched = self.drain(|req| {
            req.method == method::SIGN_EVENT && sign_event_kind(&req.params) == Some(kind)
        });
        let change = PermissionPolicy::default().deny_kind(kind);
        self.finish_bulk(matched, &change, Some(reason))
    }

    /// Execute a request against the signer capability.
    pub(crate) async fn execute(&self, request: &PermissionRequest) -> Result<String> {
        match request.method.as_str() {
            method::SIGN_EVENT => {
                let raw = first_param(request)?;
                let template = serde_json::from_str(raw)
                    .map_err(|e| EngineError::InvalidParams(format!("bad event template: {e}")))?;
                let signed = self.signer.sign_event(template).await?;
                Ok(serde_json::to_string(&signed)
                    .map_err(|e| CoreError::Serialization(e.to_string()))?)
            }
            method::GET_PUBLIC_KEY => Ok(self.signer.get_public_key().await?.to_hex()),
            method::CONNECT => Ok("ack".into()),
            method::NIP04_ENCRYPT => self.cipher(request, CipherScheme::Nip04, true).await,
            method::NIP04_DECRYPT => self.cipher(request, CipherScheme::Nip04, false).await,
            method::NIP44_ENCRYPT => self.cipher(request, CipherScheme::Nip44, true).await,
            method::NIP44_DECRYPT => self.cipher(request, CipherScheme::Nip44, false).await,
            other => Err(EngineError::InvalidParams(format!(
                "method {other} cannot be executed"
            ))),
        }
    }

    /// `params = [third_party_pubkey, payload]` for all four cipher methods.
    async fn cipher(
        &self,
        request: &PermissionRequest,
        scheme: CipherScheme,
        encrypt: bool,
    ) -> Result<String> {
        let [counterparty, payload] = request.params.as_slice() else {
            return Err(EngineError::InvalidParams(format!(
                "{} takes [pubkey, payload]",
                request.method
            )));
        };
        let counterparty = PublicKey::from_hex(counterparty)?;
        let result = if encrypt {
            self.signer.encrypt(&counterparty, payload, scheme).await?
        } else {
            self.signer.decrypt(&counterparty, payload).await?
        };
        Ok(result)
    }

    async fn expire(self: Arc<Self>, id: &str) {
        let Some(entry) = self.take(id) else {
            return;
        };
        debug!(%id, "queued request timed out");
        self.answer_reject(&entry.request, entry.scheme, REASON_TIMEOUT)
            .await;
        self.bus.emit(QueueEvent::Denied {
            request: entry.request,
            reason: REASON_TIMEOUT.into(),
        });
    }

    /// The single removal path: drops the entry and disarms its timer.
    fn take(&self, id: &str) -> Option<Entry> {
        let entry = lock(&self.entries).remove(id)?;
        entry.timer.abort();
        Some(entry)
    }

    fn drain(&self, pred: impl Fn(&PermissionRequest) -> bool) -> Vec<Entry> {
        let mut entries = lock(&self.entries);
        let ids: Vec<String> = entries
            .iter()
            .filter(|(_, e)| pred(&e.request))
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| {
                let entry = entries.remove(&id)?;
                entry.timer.abort();
                Some(entry)
            })
            .collect()
    }

    fn finish_bulk(
        &self,
        mut matched: Vec<Entry>,
        change: &PermissionPolicy,
        deny_reason: Option<&str>,
    ) -> Vec<PermissionRequest> {
        matched.sort_by(|a, b| a.request.stamp.cmp(&b.request.stamp));

        // One shared policy change per owning session.
        let owners: HashSet<PublicKey> = matched.iter().map(|e| e.request.session).collect();
        for owner in owners {
            self.sessions.apply_policy_changes(&owner, change);
        }

        matched
            .into_iter()
            .map(|entry| {
                match deny_reason {
                    Some(reason) => self.bus.emit(QueueEvent::Denied {
                        request: entry.request.clone(),
                        reason: reason.to_string(),
                    }),
                    None if !entry.announced => {
                        self.bus.emit(QueueEvent::Approved(entry.request.clone()))
                    }
                    None => {}
                }
                entry.request
            })
            .collect()
    }

    fn fold_changes(&self, request: &PermissionRequest, changes: Option<&PermissionPolicy>) {
        if let Some(changes) = changes {
            self.sessions.apply_policy_changes(&request.session, changes);
        }
    }

    async fn answer_reject(&self, request: &PermissionRequest, scheme: CipherScheme, reason: &str) {
        let reject = Message::Reject(RejectMessage {
            id: request.id.clone(),
            error: reason.to_string(),
        });
        if let Err(e) = self
            .socket
            .send(&reject, &request.session, scheme, None)
            .await
        {
            warn!(id = %request.id, error = %e, "failed to send reject");
        }
    }
}

fn first_param(request: &PermissionRequest) -> Result<&str> {
    request
        .params
        .first()
        .map(String::as_str)
        .ok_or_else(|| EngineError::InvalidParams(format!("{} takes one param", request.method)))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
