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

//! The credential verification seam.
//!
//! [`MethodVerifier`] is the contract between the gate and whatever
//! actually checks credentials: an authorized-keys store, a password
//! database, a PAM conversation. The gate never inspects credential
//! material itself - it dispatches to the verifier registered for the
//! requested method and maps the verdict onto the wire.
//!
//! # Error Handling
//!
//! Methods return `Result<AuthVerdict>` rather than just `AuthVerdict` so
//! infrastructure failures (unreadable key file, backend outage) stay
//! distinguishable from rejections. The gate treats an `Err` as a counted
//! failure: an outage must never let a client in, and must not tear the
//! connection down either.

use anyhow::Result;
use async_trait::async_trait;

use crate::auth::messages::MethodPayload;
use crate::shared::auth_types::{AuthVerdict, Identity};

/// Verifies credentials for one authentication method.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one verifier instance is shared
/// across all connections.
#[async_trait]
pub trait MethodVerifier: Send + Sync {
    /// The method name this verifier answers for (`"publickey"` or
    /// `"password"`).
    fn method(&self) -> &'static str;

    /// Verify a credential for a resolved identity.
    ///
    /// # Arguments
    ///
    /// * `identity` - The validated system identity the client claims
    /// * `payload` - The method-specific credential material
    ///
    /// # Returns
    ///
    /// - `Ok(AuthVerdict::Accept)` - the credential is valid
    /// - `Ok(AuthVerdict::Reject)` - the credential is wrong
    /// - `Ok(AuthVerdict::Partial)` - this step passed but policy requires
    ///   another method
    /// - `Err(...)` - verification infrastructure failed
    ///
    /// # Security
    ///
    /// Implementations should use constant-time comparison where possible
    /// and must never log credential material.
    async fn verify(&self, identity: &Identity, payload: &MethodPayload) -> Result<AuthVerdict>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::auth_types::method_names;

    /// A verifier that always rejects.
    struct RejectAll;

    #[async_trait]
    impl MethodVerifier for RejectAll {
        fn method(&self) -> &'static str {
            method_names::PASSWORD
        }

        async fn verify(
            &self,
            _identity: &Identity,
            _payload: &MethodPayload,
        ) -> Result<AuthVerdict> {
            Ok(AuthVerdict::Reject)
        }
    }

    /// A verifier that always accepts.
    struct AcceptAll;

    #[async_trait]
    impl MethodVerifier for AcceptAll {
        fn method(&self) -> &'static str {
            method_names::PUBKEY
        }

        async fn verify(
            &self,
            _identity: &Identity,
            _payload: &MethodPayload,
        ) -> Result<AuthVerdict> {
            Ok(AuthVerdict::Accept)
        }
    }

    #[tokio::test]
    async fn test_reject_all() {
        let verifier = RejectAll;
        let identity = Identity::new("test", 1000, 1000);
        let verdict = verifier
            .verify(&identity, &MethodPayload::None)
            .await
            .unwrap();
        assert!(verdict.is_rejected());
        assert_eq!(verifier.method(), "password");
    }

    #[tokio::test]
    async fn test_accept_all() {
        let verifier = AcceptAll;
        let identity = Identity::new("test", 1000, 1000);
        let verdict = verifier
            .verify(&identity, &MethodPayload::None)
            .await
            .unwrap();
        assert!(verdict.is_accepted());
    }

    #[tokio::test]
    async fn test_verifier_as_trait_object() {
        let verifiers: Vec<Box<dyn MethodVerifier>> = vec![Box::new(RejectAll), Box::new(AcceptAll)];
        let found = verifiers.iter().find(|v| v.method() == "publickey");
        assert!(found.is_some());
    }
}
