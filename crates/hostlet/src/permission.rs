//! Permission prompts answered asynchronously by the controller.
//!
//! A guest thread asking for a permission sends `PermissionConfirm` with a
//! fresh ticket and blocks on a one-shot channel until the dispatcher
//! routes the controller's decision back, or the wait times out.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;

use crate::bridge::protocol::Message;
use crate::bridge::transport::Outbound;
use crate::lock::lock;

/// Controller answer to a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Grant this permission for this signer set.
    Yes,
    /// Deny once.
    No,
    /// Grant everything for this signer set.
    GrantAll,
    /// Deny everything for this signer set.
    RejectAll,
}

impl Decision {
    /// Anything unrecognised denies.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" => Self::Yes,
            "grant" => Self::GrantAll,
            "reject" => Self::RejectAll,
            _ => Self::No,
        }
    }

    fn allows(self) -> bool {
        matches!(self, Self::Yes | Self::GrantAll)
    }
}

type SignerSet = BTreeSet<Vec<u8>>;

#[derive(Default)]
struct PermissionCache {
    grant_all: HashSet<SignerSet>,
    reject_all: HashSet<SignerSet>,
    granted: HashMap<SignerSet, HashSet<String>>,
}

impl PermissionCache {
    fn lookup(&self, signers: &SignerSet, permission: &str) -> Option<bool> {
        if self.reject_all.contains(signers) {
            return Some(false);
        }
        if self.grant_all.contains(signers) {
            return Some(true);
        }
        self.granted
            .get(signers)
            .filter(|set| set.contains(permission))
            .map(|_| true)
    }

    fn record(&mut self, signers: SignerSet, permission: &str, decision: Decision) {
        match decision {
            Decision::Yes => {
                self.granted
                    .entry(signers)
                    .or_default()
                    .insert(permission.to_string());
            }
            Decision::GrantAll => {
                self.grant_all.insert(signers);
            }
            Decision::RejectAll => {
                self.reject_all.insert(signers);
            }
            Decision::No => {}
        }
    }
}

pub struct PermissionBroker {
    outbound: Outbound,
    timeout: Duration,
    next_ticket: AtomicU64,
    pending: DashMap<String, SyncSender<Decision>>,
    cache: Mutex<PermissionCache>,
}

impl PermissionBroker {
    pub fn new(outbound: Outbound, timeout: Duration) -> Self {
        Self {
            outbound,
            timeout,
            next_ticket: AtomicU64::new(1),
            pending: DashMap::new(),
            cache: Mutex::new(PermissionCache::default()),
        }
    }

    /// Ask whether code signed by `signers` may use `permission`.
    ///
    /// Blocks the calling thread while the controller prompts the user.
    pub fn check(&self, signers: &[Vec<u8>], permission: &str) -> bool {
        if signers.is_empty() {
            tracing::debug!(%permission, "Denying permission for unsigned code");
            return false;
        }
        let signer_set: SignerSet = signers.iter().cloned().collect();
        if let Some(cached) = lock(&self.cache).lookup(&signer_set, permission) {
            tracing::debug!(%permission, granted = cached, "Permission answered from cache");
            return cached;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = mpsc::sync_channel(1);
        self.pending.insert(ticket.clone(), tx);

        let certificates = signers.iter().map(|cert| STANDARD.encode(cert)).collect();
        if let Err(e) = self.outbound.send(Message::PermissionConfirm {
            ticket: ticket.clone(),
            permission: permission.to_string(),
            certificates,
        }) {
            tracing::warn!(%ticket, error = %e, "Failed to send permission prompt");
            self.pending.remove(&ticket);
            return false;
        }

        let decision = match rx.recv_timeout(self.timeout) {
            Ok(decision) => decision,
            Err(_) => {
                tracing::warn!(%ticket, %permission, "Permission prompt timed out");
                self.pending.remove(&ticket);
                return false;
            }
        };
        tracing::info!(%ticket, %permission, ?decision, "Permission decided");
        lock(&self.cache).record(signer_set, permission, decision);
        decision.allows()
    }

    /// Route a controller decision to the waiting thread. Returns false for
    /// unknown or expired tickets.
    pub fn answer(&self, ticket: &str, decision: Decision) -> bool {
        match self.pending.remove(ticket) {
            Some((_, tx)) => tx.try_send(decision).is_ok(),
            None => {
                tracing::debug!(%ticket, "Dropping stale permission decision");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
