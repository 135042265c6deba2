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

//! The per-connection authentication gate.
//!
//! # Architecture
//!
//! One [`AuthGate`] is created per connection and owns all mutable
//! authentication state for that connection; nothing here is process-wide.
//! The transport layer parses USERAUTH_REQUEST packets into
//! [`AuthRequest`]s, feeds them to
//! [`AuthGate::handle_auth_request`], and implements [`AuthOutbound`] to
//! carry the gate's responses back onto the wire.
//!
//! Credential verification is pluggable: each enabled method is backed by
//! a [`MethodVerifier`]. The gate enforces, structurally, that a success
//! response can only be produced by a verifier returning
//! [`AuthVerdict::Accept`] for the request being answered.
//!
//! [`AuthGate`]: gate::AuthGate
//! [`AuthGate::handle_auth_request`]: gate::AuthGate::handle_auth_request
//! [`AuthRequest`]: messages::AuthRequest
//! [`AuthOutbound`]: messages::AuthOutbound
//! [`MethodVerifier`]: verifier::MethodVerifier
//! [`AuthVerdict::Accept`]: crate::shared::auth_types::AuthVerdict::Accept

pub mod gate;
pub mod identity;
pub mod messages;
pub mod slots;
pub mod throttle;
pub mod verifier;

pub use gate::AuthGate;
pub use identity::{IdentitySource, IdentityValidator, SystemIdentitySource};
pub use messages::{AuthOutbound, AuthRequest, AuthResponse, MethodPayload};
pub use slots::{PreAuthSlots, SlotReservation};
pub use throttle::FailureThrottle;
pub use verifier::MethodVerifier;
