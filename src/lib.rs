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

//! Pre-session security gate for SSH servers.
//!
//! `bgate` implements the two subsystems that sit between an authenticated
//! transport and an interactive shell:
//!
//! - the per-connection **authentication gate** ([`AuthGate`]): method
//!   negotiation, credential dispatch through pluggable
//!   [`MethodVerifier`]s, identity policy enforcement, anti-enumeration
//!   throttling and lockout;
//! - the **PTY provisioning pipeline** ([`PtyAllocator`],
//!   [`TtyController`]): pseudo-terminal allocation with no descriptor
//!   leaks, controlling-terminal attachment, and ownership transfer to the
//!   authenticated identity.
//!
//! The SSH transport (framing, key exchange, encryption), channel
//! multiplexing, and the cryptographic verification of credentials are
//! external collaborators: the transport feeds [`AuthRequest`]s in and
//! implements [`AuthOutbound`]; credential checks live behind
//! [`MethodVerifier`].

pub mod auth;
pub mod config;
pub mod pty;
pub mod shared;

pub use auth::gate::AuthGate;
pub use auth::identity::{IdentitySource, IdentityValidator, SystemIdentitySource};
pub use auth::messages::{AuthOutbound, AuthRequest, AuthResponse, MethodPayload};
pub use auth::slots::{PreAuthSlots, SlotReservation};
pub use auth::throttle::FailureThrottle;
pub use auth::verifier::MethodVerifier;
pub use config::GateConfig;
pub use pty::alloc::{PtyAllocator, PtySession, PtyStrategy};
pub use pty::tty::{TtyController, Window};
pub use shared::auth_types::{AuthVerdict, Identity, MethodSet};
pub use shared::error::GateError;
