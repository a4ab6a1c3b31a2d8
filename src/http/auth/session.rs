//! Auth state bound to one physical connection.
//!
//! NTLM authenticates the connection, not the request, so the handshake
//! state lives next to the socket. A negotiator takes an exclusive lease on
//! it for the whole three-message exchange.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Where an NTLM handshake stands on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NtlmPhase {
    #[default]
    Idle,
    /// Type 1 written, waiting for the type 2 challenge.
    NegotiateSent,
    /// Type 3 written.
    AuthenticateSent,
    Authenticated,
    Failed,
}

/// Handshake record guarded by the lease.
#[derive(Debug, Default)]
pub struct NtlmState {
    phase: NtlmPhase,
    domain: String,
    workstation: String,
    /// Handshakes started on this connection.
    attempts: u32,
}

impl NtlmState {
    pub fn phase(&self) -> NtlmPhase {
        self.phase
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn workstation(&self) -> &str {
        &self.workstation
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Type 1 is about to go out.
    pub fn begin(&mut self, domain: &str, workstation: &str) {
        self.phase = NtlmPhase::NegotiateSent;
        self.domain = domain.to_string();
        self.workstation = workstation.to_string();
        self.attempts += 1;
    }

    pub fn advance(&mut self, phase: NtlmPhase) {
        self.phase = phase;
    }
}

/// Exclusive hold on a connection's NTLM state.
pub type NtlmLease = OwnedMutexGuard<NtlmState>;

/// Per-connection authentication state.
#[derive(Debug)]
pub struct AuthSession {
    connection_id: u64,
    ntlm: Arc<Mutex<NtlmState>>,
}

impl AuthSession {
    pub fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            ntlm: Arc::new(Mutex::new(NtlmState::default())),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Wait for, then take, the NTLM lease.
    pub async fn lease_ntlm(&self) -> NtlmLease {
        Arc::clone(&self.ntlm).lock_owned().await
    }

    /// Take the lease if nobody holds it.
    pub fn try_lease_ntlm(&self) -> Option<NtlmLease> {
        Arc::clone(&self.ntlm).try_lock_owned().ok()
    }

    /// Phase as seen from outside a lease. `None` while a handshake holds it.
    pub fn ntlm_phase(&self) -> Option<NtlmPhase> {
        self.ntlm.try_lock().ok().map(|s| s.phase)
    }

    pub fn is_ntlm_authenticated(&self) -> bool {
        self.ntlm_phase() == Some(NtlmPhase::Authenticated)
    }
}
