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

//! Error types for the authentication gate.
//!
//! [`GateError`] covers exactly the *fatal* outcomes: conditions that must
//! terminate the connection. Recoverable problems (bad credential, unknown
//! user, unsupported method) never surface here - the gate answers them
//! with a failure response and the connection continues.

use thiserror::Error;

/// Fatal authentication-gate errors.
///
/// Any of these returned from [`AuthGate::handle_auth_request`] means the
/// connection must be torn down. The gate latches itself terminated so a
/// buggy caller that keeps feeding messages gets [`GateError::Terminated`]
/// rather than further processing.
///
/// [`AuthGate::handle_auth_request`]: crate::auth::gate::AuthGate::handle_auth_request
#[derive(Debug, Error)]
pub enum GateError {
    /// The request named a service other than `ssh-connection`. This is a
    /// malformed or adversarial client at the service-negotiation layer,
    /// not a credential problem.
    #[error("unrecognized service '{0}' in authentication request")]
    UnknownService(String),

    /// The wire username contained an embedded terminator before its
    /// declared end, which signals protocol-level smuggling.
    #[error("malformed username: embedded terminator in wire string")]
    MalformedUsername,

    /// The client supplied a different username than an earlier request in
    /// the same connection. Switching identity mid-connection would
    /// invalidate any partial multi-factor state already accepted.
    #[error("client switched usernames mid-connection")]
    UsernameMismatch,

    /// The failure count reached the configured maximum.
    #[error("maximum authentication attempts reached for user '{user}'")]
    LockedOut {
        /// Resolved account name, or a placeholder when the claimed
        /// username never resolved to an identity.
        user: String,
    },

    /// A previous fatal outcome already terminated this gate.
    #[error("authentication gate already terminated")]
    Terminated,

    /// The outbound sink failed while sending a response.
    #[error("failed to send authentication response: {0:#}")]
    Outbound(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GateError::UnknownService("ssh-userauth".to_string());
        assert!(err.to_string().contains("ssh-userauth"));

        let err = GateError::LockedOut {
            user: "alice".to_string(),
        };
        assert!(err.to_string().contains("alice"));

        let err = GateError::Terminated;
        assert!(err.to_string().contains("terminated"));
    }
}
