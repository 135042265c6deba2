// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-connection authentication state machine.
//!
//! One [`AuthGate`] exists per connection and is driven by the transport:
//! each decoded USERAUTH_REQUEST goes through
//! [`AuthGate::handle_auth_request`], strictly one at a time. The gate
//! answers on the supplied [`AuthOutbound`] sink and reports fatal
//! outcomes as [`GateError`]; the caller tears the connection down on any
//! error and must not feed further messages (the gate enforces this with
//! a terminated latch).
//!
//! # State
//!
//! ```text
//! AWAITING_REQUEST --request--> VERIFYING --accept--> AUTHENTICATED
//!        ^                          |
//!        +------- failure ---------+--- failcount limit --> TERMINATED
//! ```
//!
//! `authdone` is monotonic: it flips to `true` exactly once, after the
//! success message has been handed to the outbound queue, and never
//! back. The enabled method set is computed at construction and never
//! mutated. A success response is only produced by the `Accept` arm of a
//! verifier verdict - there is no other call site of the success path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::auth::identity::{IdentityPolicy, IdentitySource, IdentityValidator};
use crate::auth::messages::{
    AuthOutbound, AuthRequest, AuthResponse, BANNER_LANGUAGE, SERVICE_CONNECTION,
};
use crate::auth::slots::SlotReservation;
use crate::auth::throttle::FailureThrottle;
use crate::auth::verifier::MethodVerifier;
use crate::config::GateConfig;
use crate::shared::auth_types::{method_names, AuthVerdict, Identity, MethodSet};
use crate::shared::error::GateError;

/// Per-connection authentication gate.
pub struct AuthGate {
    /// Set once, after the success message is committed outbound.
    authdone: bool,

    /// Latched on any fatal outcome; no further message is processed.
    terminated: bool,

    /// Methods enabled for this connection. Fixed at construction.
    authtypes: MethodSet,

    /// Counted failures; monotonically non-decreasing.
    failcount: u32,

    /// Banner to send before the first response, consumed on send.
    banner: Option<String>,

    /// Deadline for completing authentication; cleared on success.
    auth_deadline: Option<Instant>,

    /// Whether the authenticated session may bind privileged ports.
    allow_privileged_ports: bool,

    validator: IdentityValidator,
    throttle: FailureThrottle,
    verifiers: Vec<Arc<dyn MethodVerifier>>,
    slot: SlotReservation,
}

impl AuthGate {
    /// Create the gate for a freshly accepted connection.
    ///
    /// The enabled method set is the intersection of the registered
    /// verifiers with the administrative configuration: a password
    /// verifier does not enable the password method when
    /// `config.password_auth` is off.
    pub fn new(
        config: &GateConfig,
        source: Arc<dyn IdentitySource>,
        verifiers: Vec<Arc<dyn MethodVerifier>>,
        slot: SlotReservation,
    ) -> Self {
        let mut authtypes = MethodSet::empty();
        for verifier in &verifiers {
            match verifier.method() {
                method_names::PUBKEY => authtypes.insert_pubkey(),
                method_names::PASSWORD => {
                    if config.password_auth {
                        authtypes.insert_password();
                    } else {
                        debug!("password verifier registered but password auth is disabled");
                    }
                }
                other => warn!(method = other, "verifier registered for unknown method"),
            }
        }

        let policy = IdentityPolicy {
            allow_root_login: config.allow_root_login,
            allowed_group: config.allowed_group.clone(),
        };

        let throttle = FailureThrottle::new(
            Duration::from_millis(config.fail_delay_ms),
            Duration::from_millis(config.fail_delay_jitter_ms),
            config.max_auth_tries,
        );

        let auth_deadline = config.auth_timeout().map(|timeout| Instant::now() + timeout);

        Self {
            authdone: false,
            terminated: false,
            authtypes,
            failcount: 0,
            banner: config.banner.clone(),
            auth_deadline,
            allow_privileged_ports: false,
            validator: IdentityValidator::new(source, policy),
            throttle,
            verifiers,
            slot,
        }
    }

    /// Process one authentication request.
    ///
    /// `Ok(())` means the connection continues (which includes answered
    /// failures). Any `Err` is fatal: the caller must close the
    /// connection, and this gate will refuse everything afterwards.
    pub async fn handle_auth_request(
        &mut self,
        request: AuthRequest,
        out: &mut dyn AuthOutbound,
    ) -> Result<(), GateError> {
        if self.terminated {
            return Err(GateError::Terminated);
        }

        if self.authdone {
            // Success was already sent; do not resend it or process the
            // request further.
            debug!("ignoring authentication request after success");
            return Ok(());
        }

        if let Some(message) = self.banner.take() {
            out.send(AuthResponse::Banner {
                message,
                language: BANNER_LANGUAGE.to_string(),
            })
            .await
            .map_err(GateError::Outbound)?;
        }

        if request.service != SERVICE_CONNECTION {
            warn!(service = %request.service, "unknown service in authentication request");
            self.terminated = true;
            return Err(GateError::UnknownService(request.service));
        }

        let user_check = match self.validator.check_username(&request.username) {
            Ok(check) => check,
            Err(err) => {
                self.terminated = true;
                return Err(err);
            }
        };

        // `none` probes and methods that are not enabled are answered
        // without consulting a verifier, but still count toward the
        // failure budget so they are no cheaper than a wrong credential.
        if request.method == method_names::NONE || !self.authtypes.contains_name(&request.method) {
            return self.send_failure(false, true, out).await;
        }

        if !user_check.is_valid() {
            return self.send_failure(false, true, out).await;
        }

        let Some(verifier) = self
            .verifiers
            .iter()
            .find(|v| v.method() == request.method)
            .cloned()
        else {
            return self.send_failure(false, true, out).await;
        };
        let Some(identity) = self.validator.validated_identity().cloned() else {
            return self.send_failure(false, true, out).await;
        };

        let verdict = match verifier.verify(&identity, &request.payload).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    method = %request.method,
                    user = %identity.username,
                    error = %format!("{err:#}"),
                    "credential verifier failed"
                );
                AuthVerdict::Reject
            }
        };

        match verdict {
            AuthVerdict::Accept => self.send_success(out).await,
            AuthVerdict::Partial => self.send_failure(true, true, out).await,
            AuthVerdict::Reject => self.send_failure(false, true, out).await,
        }
    }

    /// Answer the current request with USERAUTH_FAILURE.
    ///
    /// When `count` is set the anti-timing delay runs first, the failure
    /// counter is incremented after the send, and crossing the lockout
    /// threshold terminates the connection within this same cycle.
    async fn send_failure(
        &mut self,
        partial: bool,
        count: bool,
        out: &mut dyn AuthOutbound,
    ) -> Result<(), GateError> {
        if count {
            self.throttle.delay().await;
        }

        out.send(AuthResponse::Failure {
            methods: self.authtypes.advertised(),
            partial,
        })
        .await
        .map_err(GateError::Outbound)?;

        if count {
            self.failcount += 1;
            if self.throttle.is_locked_out(self.failcount) {
                let user = self.validator.lockout_display_name().to_string();
                warn!(
                    user = %user,
                    failcount = self.failcount,
                    "maximum authentication attempts reached, terminating connection"
                );
                self.terminated = true;
                return Err(GateError::LockedOut { user });
            }
        }

        Ok(())
    }

    /// Answer the current request with USERAUTH_SUCCESS and finalize the
    /// session.
    ///
    /// Reached only from the `Accept` arm of a verifier verdict.
    async fn send_success(&mut self, out: &mut dyn AuthOutbound) -> Result<(), GateError> {
        out.send(AuthResponse::Success)
            .await
            .map_err(GateError::Outbound)?;

        // authdone flips only after the success bytes are handed to the
        // outbound queue; delayed-compression negotiation keys off the
        // committed message, not our state.
        self.authdone = true;
        self.auth_deadline = None;

        if let Some(identity) = self.validator.validated_identity() {
            info!(
                user = %identity.username,
                uid = identity.uid,
                "authentication succeeded"
            );
            if identity.is_root() {
                self.allow_privileged_ports = true;
            }
        }

        // The pre-auth slot must be returned on every success path, or
        // long sessions starve new logins.
        self.slot.release();

        Ok(())
    }

    /// Whether authentication has completed successfully.
    pub fn is_authenticated(&self) -> bool {
        self.authdone
    }

    /// Whether a fatal outcome has terminated this gate.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Counted authentication failures so far.
    pub fn fail_count(&self) -> u32 {
        self.failcount
    }

    /// Methods enabled for this connection.
    pub fn methods(&self) -> MethodSet {
        self.authtypes
    }

    /// The identity that authenticated, once [`is_authenticated`] is
    /// true.
    ///
    /// [`is_authenticated`]: AuthGate::is_authenticated
    pub fn authenticated_identity(&self) -> Option<&Identity> {
        if self.authdone {
            self.validator.validated_identity()
        } else {
            None
        }
    }

    /// Whether the authenticated session may bind privileged ports.
    pub fn allow_privileged_ports(&self) -> bool {
        self.allow_privileged_ports
    }

    /// Deadline for completing authentication, until success clears it.
    /// The connection loop enforces this.
    pub fn auth_deadline(&self) -> Option<Instant> {
        self.auth_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::messages::MethodPayload;
    use crate::auth::slots::PreAuthSlots;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    struct StaticSource {
        users: HashMap<String, Identity>,
    }

    impl StaticSource {
        fn with_alice() -> Arc<Self> {
            let mut users = HashMap::new();
            users.insert(
                "alice".to_string(),
                Identity::new("alice", 1000, 1000).with_shell("/bin/sh"),
            );
            users.insert(
                "root".to_string(),
                Identity::new("root", 0, 0).with_shell("/bin/sh"),
            );
            Arc::new(Self { users })
        }
    }

    impl IdentitySource for StaticSource {
        fn lookup_user(&self, username: &str) -> Option<Identity> {
            self.users.get(username).cloned()
        }

        fn group_gid(&self, _group: &str) -> Option<u32> {
            None
        }

        fn shell_is_valid(&self, shell: &Path) -> bool {
            shell == Path::new("/bin/sh")
        }

        fn process_uid(&self) -> u32 {
            0
        }
    }

    struct PasswordStub {
        accept: &'static str,
    }

    #[async_trait]
    impl MethodVerifier for PasswordStub {
        fn method(&self) -> &'static str {
            method_names::PASSWORD
        }

        async fn verify(
            &self,
            _identity: &Identity,
            payload: &MethodPayload,
        ) -> Result<AuthVerdict> {
            match payload {
                MethodPayload::Password(password) if password.as_str() == self.accept => {
                    Ok(AuthVerdict::Accept)
                }
                _ => Ok(AuthVerdict::Reject),
            }
        }
    }

    struct FailingVerifier;

    #[async_trait]
    impl MethodVerifier for FailingVerifier {
        fn method(&self) -> &'static str {
            method_names::PASSWORD
        }

        async fn verify(
            &self,
            _identity: &Identity,
            _payload: &MethodPayload,
        ) -> Result<AuthVerdict> {
            anyhow::bail!("backend unavailable")
        }
    }

    #[derive(Default)]
    struct RecordingOutbound {
        sent: Mutex<Vec<AuthResponse>>,
    }

    impl RecordingOutbound {
        fn responses(&self) -> Vec<AuthResponse> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthOutbound for RecordingOutbound {
        async fn send(&mut self, response: AuthResponse) -> Result<()> {
            self.sent.lock().unwrap().push(response);
            Ok(())
        }
    }

    fn fast_config() -> GateConfig {
        GateConfig {
            max_auth_tries: 3,
            fail_delay_ms: 0,
            fail_delay_jitter_ms: 0,
            ..Default::default()
        }
    }

    fn gate_with(config: GateConfig, verifiers: Vec<Arc<dyn MethodVerifier>>) -> AuthGate {
        AuthGate::new(
            &config,
            StaticSource::with_alice(),
            verifiers,
            SlotReservation::unbounded(),
        )
    }

    fn password_gate(config: GateConfig) -> AuthGate {
        gate_with(config, vec![Arc::new(PasswordStub { accept: "secret" })])
    }

    #[tokio::test]
    async fn test_correct_password_succeeds() {
        let mut gate = password_gate(fast_config());
        let mut out = RecordingOutbound::default();

        gate.handle_auth_request(AuthRequest::password("alice", "secret"), &mut out)
            .await
            .unwrap();

        assert!(gate.is_authenticated());
        assert_eq!(out.responses(), vec![AuthResponse::Success]);
        assert_eq!(gate.authenticated_identity().unwrap().username, "alice");
        assert!(!gate.allow_privileged_ports());
        assert!(gate.auth_deadline().is_none());
    }

    #[tokio::test]
    async fn test_requests_after_success_are_ignored() {
        let mut gate = password_gate(fast_config());
        let mut out = RecordingOutbound::default();

        gate.handle_auth_request(AuthRequest::password("alice", "secret"), &mut out)
            .await
            .unwrap();
        gate.handle_auth_request(AuthRequest::password("alice", "secret"), &mut out)
            .await
            .unwrap();

        // Only one success on the wire, ever.
        assert_eq!(out.responses(), vec![AuthResponse::Success]);
    }

    #[tokio::test]
    async fn test_banner_sent_once_before_first_response() {
        let config = GateConfig {
            banner: Some("No trespassing.".to_string()),
            ..fast_config()
        };
        let mut gate = password_gate(config);
        let mut out = RecordingOutbound::default();

        gate.handle_auth_request(AuthRequest::none("alice"), &mut out)
            .await
            .unwrap();
        gate.handle_auth_request(AuthRequest::none("alice"), &mut out)
            .await
            .unwrap();

        let responses = out.responses();
        assert!(matches!(&responses[0], AuthResponse::Banner { message, language }
            if message == "No trespassing." && language == "en"));
        // No second banner.
        assert_eq!(
            responses
                .iter()
                .filter(|r| matches!(r, AuthResponse::Banner { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_service_mismatch_is_fatal() {
        let mut gate = password_gate(fast_config());
        let mut out = RecordingOutbound::default();

        let mut request = AuthRequest::none("alice");
        request.service = "ssh-userauth".to_string();

        let err = gate.handle_auth_request(request, &mut out).await.unwrap_err();
        assert!(matches!(err, GateError::UnknownService(_)));
        assert!(gate.is_terminated());

        // The gate refuses everything afterwards.
        let err = gate
            .handle_auth_request(AuthRequest::none("alice"), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Terminated));
    }

    #[tokio::test]
    async fn test_none_probe_lists_methods_and_counts() {
        let mut gate = password_gate(fast_config());
        let mut out = RecordingOutbound::default();

        gate.handle_auth_request(AuthRequest::none("alice"), &mut out)
            .await
            .unwrap();

        assert_eq!(
            out.responses(),
            vec![AuthResponse::Failure {
                methods: "password".to_string(),
                partial: false,
            }]
        );
        assert_eq!(gate.fail_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_password_not_advertised() {
        let config = GateConfig {
            password_auth: false,
            ..fast_config()
        };
        let mut gate = password_gate(config);
        let mut out = RecordingOutbound::default();

        assert!(gate.methods().is_empty());

        // A password attempt is refused without reaching the verifier.
        gate.handle_auth_request(AuthRequest::password("alice", "secret"), &mut out)
            .await
            .unwrap();
        assert_eq!(
            out.responses(),
            vec![AuthResponse::Failure {
                methods: String::new(),
                partial: false,
            }]
        );
        assert!(!gate.is_authenticated());
    }

    #[tokio::test]
    async fn test_verifier_error_is_counted_failure() {
        let mut gate = gate_with(fast_config(), vec![Arc::new(FailingVerifier)]);
        let mut out = RecordingOutbound::default();

        gate.handle_auth_request(AuthRequest::password("alice", "anything"), &mut out)
            .await
            .unwrap();

        assert!(!gate.is_authenticated());
        assert_eq!(gate.fail_count(), 1);
        assert!(matches!(
            out.responses().as_slice(),
            [AuthResponse::Failure { .. }]
        ));
    }

    #[tokio::test]
    async fn test_lockout_fires_in_crossing_cycle() {
        let mut gate = password_gate(fast_config());
        let mut out = RecordingOutbound::default();

        for _ in 0..2 {
            gate.handle_auth_request(AuthRequest::password("alice", "wrong"), &mut out)
                .await
                .unwrap();
        }

        let err = gate
            .handle_auth_request(AuthRequest::password("alice", "wrong"), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::LockedOut { user } if user == "alice"));
        assert_eq!(gate.fail_count(), 3);
        // The crossing request still got its failure response first.
        assert_eq!(out.responses().len(), 3);
    }

    #[tokio::test]
    async fn test_slot_released_exactly_once_on_success() {
        let pool = PreAuthSlots::new(1);
        let slot = pool.try_reserve().unwrap();
        let config = fast_config();
        let mut gate = AuthGate::new(
            &config,
            StaticSource::with_alice(),
            vec![Arc::new(PasswordStub { accept: "secret" })],
            slot,
        );
        let mut out = RecordingOutbound::default();
        assert_eq!(pool.available(), 0);

        gate.handle_auth_request(AuthRequest::password("alice", "secret"), &mut out)
            .await
            .unwrap();
        assert_eq!(pool.available(), 1);

        // Further (ignored) requests and the eventual drop of the gate do
        // not double-release.
        gate.handle_auth_request(AuthRequest::password("alice", "secret"), &mut out)
            .await
            .unwrap();
        drop(gate);
        assert_eq!(pool.available(), 1);
    }
}
