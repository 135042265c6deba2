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

//! Messages exchanged at the authentication boundary.
//!
//! The transport layer decodes USERAUTH_REQUEST packets into
//! [`AuthRequest`] and implements [`AuthOutbound`] to encode and transmit
//! the gate's [`AuthResponse`]s. Nothing in this module touches the wire
//! itself.
//!
//! # Security
//!
//! Password material is held in [`zeroize::Zeroizing`] storage and is
//! redacted from `Debug` output; authentication responses never reveal
//! which check failed.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use zeroize::Zeroizing;

/// The service name the gate accepts in authentication requests.
///
/// Any other value is a fatal protocol violation.
pub const SERVICE_CONNECTION: &str = "ssh-connection";

/// Language tag attached to banner messages.
pub const BANNER_LANGUAGE: &str = "en";

/// A single decoded authentication request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Raw username bytes exactly as they appeared on the wire. Kept raw
    /// so embedded-terminator smuggling is detectable.
    pub username: Vec<u8>,

    /// Requested service name.
    pub service: String,

    /// Requested method name (`"none"`, `"publickey"`, `"password"`).
    pub method: String,

    /// Method-specific payload.
    pub payload: MethodPayload,
}

impl AuthRequest {
    /// Convenience constructor for the `none` probe.
    pub fn none(username: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            service: SERVICE_CONNECTION.to_string(),
            method: crate::shared::auth_types::method_names::NONE.to_string(),
            payload: MethodPayload::None,
        }
    }

    /// Convenience constructor for a password request.
    pub fn password(username: impl Into<Vec<u8>>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            service: SERVICE_CONNECTION.to_string(),
            method: crate::shared::auth_types::method_names::PASSWORD.to_string(),
            payload: MethodPayload::Password(Zeroizing::new(password.into())),
        }
    }

    /// Convenience constructor for a public key request.
    pub fn publickey(
        username: impl Into<Vec<u8>>,
        algorithm: impl Into<String>,
        key_blob: impl Into<Vec<u8>>,
        signature: Option<Vec<u8>>,
    ) -> Self {
        Self {
            username: username.into(),
            service: SERVICE_CONNECTION.to_string(),
            method: crate::shared::auth_types::method_names::PUBKEY.to_string(),
            payload: MethodPayload::PublicKey {
                algorithm: algorithm.into(),
                key_blob: key_blob.into(),
                signature,
            },
        }
    }
}

/// Method-specific request payload.
#[derive(Clone)]
pub enum MethodPayload {
    /// No payload (`none` probe).
    None,

    /// Plaintext password, zeroized on drop.
    Password(Zeroizing<String>),

    /// Public key offer or signature.
    PublicKey {
        /// Public key algorithm name.
        algorithm: String,
        /// Public key blob in SSH wire format.
        key_blob: Vec<u8>,
        /// Signature over the session data, absent in the try phase.
        signature: Option<Vec<u8>>,
    },
}

impl fmt::Debug for MethodPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodPayload::None => f.write_str("None"),
            MethodPayload::Password(_) => f.write_str("Password(<redacted>)"),
            MethodPayload::PublicKey {
                algorithm,
                key_blob,
                signature,
            } => f
                .debug_struct("PublicKey")
                .field("algorithm", algorithm)
                .field("key_blob_len", &key_blob.len())
                .field("has_signature", &signature.is_some())
                .finish(),
        }
    }
}

/// Responses the gate produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    /// USERAUTH_BANNER, sent at most once per connection.
    Banner {
        /// Banner text.
        message: String,
        /// RFC 3066 language tag.
        language: String,
    },

    /// USERAUTH_FAILURE.
    Failure {
        /// Comma-joined list of methods that can continue, in fixed
        /// order.
        methods: String,
        /// Whether the failed request was a partial success.
        partial: bool,
    },

    /// USERAUTH_SUCCESS.
    Success,
}

/// Outbound sink for authentication responses.
///
/// Implemented by the transport layer. `send` must only return once the
/// message has been handed to the outbound cipher/queue: the gate relies
/// on that ordering to flip its `authdone` flag no earlier than the
/// success bytes are committed.
#[async_trait]
pub trait AuthOutbound: Send {
    /// Encode and enqueue a response for transmission.
    async fn send(&mut self, response: AuthResponse) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_debug_is_redacted() {
        let payload = MethodPayload::Password(Zeroizing::new("hunter2".to_string()));
        let debug = format!("{payload:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_publickey_debug_omits_blob() {
        let payload = MethodPayload::PublicKey {
            algorithm: "ssh-ed25519".to_string(),
            key_blob: vec![1, 2, 3, 4],
            signature: None,
        };
        let debug = format!("{payload:?}");
        assert!(debug.contains("ssh-ed25519"));
        assert!(debug.contains("key_blob_len"));
        assert!(!debug.contains("[1, 2, 3, 4]"));
    }

    #[test]
    fn test_request_constructors() {
        let req = AuthRequest::none("alice");
        assert_eq!(req.username, b"alice");
        assert_eq!(req.service, SERVICE_CONNECTION);
        assert_eq!(req.method, "none");

        let req = AuthRequest::password("alice", "secret");
        assert_eq!(req.method, "password");
        assert!(matches!(req.payload, MethodPayload::Password(_)));

        let req = AuthRequest::publickey("alice", "ssh-ed25519", vec![0u8; 32], None);
        assert_eq!(req.method, "publickey");
    }
}
