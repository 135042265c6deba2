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

//! Core authentication types.
//!
//! # Types
//!
//! - [`AuthVerdict`]: the outcome of a single credential verification
//! - [`MethodSet`]: the set of authentication methods a connection may use
//! - [`Identity`]: a resolved system identity record
//! - [`method_names`]: standard SSH method name constants (RFC 4252)

use std::path::PathBuf;

/// The outcome of a single credential verification.
///
/// Follows SSH protocol semantics: a method either fully succeeds, fails,
/// or succeeds while the policy still requires additional methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthVerdict {
    /// Verification succeeded - this step is accepted.
    Accept,

    /// Verification failed - access denied for this attempt.
    #[default]
    Reject,

    /// This method succeeded but further methods are required.
    Partial,
}

impl AuthVerdict {
    /// Returns `true` if the verification fully succeeded.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthVerdict::Accept)
    }

    /// Returns `true` if the verification was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, AuthVerdict::Reject)
    }

    /// Returns `true` if more methods are required.
    pub fn is_partial(&self) -> bool {
        matches!(self, AuthVerdict::Partial)
    }
}

/// Standard SSH authentication method identifiers (RFC 4252).
pub mod method_names {
    /// Public key authentication.
    pub const PUBKEY: &str = "publickey";

    /// Password authentication.
    pub const PASSWORD: &str = "password";

    /// The probe method a client sends to learn what is available.
    pub const NONE: &str = "none";
}

/// Set of authentication methods enabled for a connection.
///
/// Computed once when the gate is initialized from the registered verifiers
/// and the administrative configuration, and never mutated afterwards. The
/// advertised rendering is deterministic: `publickey` first, then
/// `password`, comma-joined, matching what clients expect in
/// USERAUTH_FAILURE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSet {
    bits: u8,
}

impl MethodSet {
    const PUBKEY: u8 = 1 << 0;
    const PASSWORD: u8 = 1 << 1;

    /// Create an empty method set.
    pub fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Returns `true` if no method is enabled.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Enable public key authentication.
    pub fn insert_pubkey(&mut self) {
        self.bits |= Self::PUBKEY;
    }

    /// Enable password authentication.
    pub fn insert_password(&mut self) {
        self.bits |= Self::PASSWORD;
    }

    /// Returns `true` if public key authentication is enabled.
    pub fn has_pubkey(&self) -> bool {
        self.bits & Self::PUBKEY != 0
    }

    /// Returns `true` if password authentication is enabled.
    pub fn has_password(&self) -> bool {
        self.bits & Self::PASSWORD != 0
    }

    /// Returns `true` if the named method is enabled.
    ///
    /// `"none"` is never a member: it is a probe, not a method.
    pub fn contains_name(&self, method: &str) -> bool {
        match method {
            method_names::PUBKEY => self.has_pubkey(),
            method_names::PASSWORD => self.has_password(),
            _ => false,
        }
    }

    /// Render the comma-joined method list advertised in failure responses.
    ///
    /// The order is fixed: `publickey`, then `password`.
    pub fn advertised(&self) -> String {
        let mut out = String::with_capacity(30);
        if self.has_pubkey() {
            out.push_str(method_names::PUBKEY);
        }
        if self.has_password() {
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(method_names::PASSWORD);
        }
        out
    }
}

/// A resolved system identity record.
///
/// Produced once per connection by identity validation and cached; the
/// session layer uses it to set up the process environment and the terminal
/// ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The account name as it exists in the system database.
    pub username: String,

    /// Numeric user ID.
    pub uid: u32,

    /// Primary group ID.
    pub gid: u32,

    /// Supplementary group IDs.
    pub groups: Vec<u32>,

    /// Login shell. An empty shell field in the system database is
    /// normalized to `/bin/sh` before this record is cached.
    pub shell: PathBuf,

    /// Home directory.
    pub home_dir: PathBuf,

    /// Display name (GECOS field), if present.
    pub display_name: Option<String>,
}

impl Identity {
    /// Create a new identity with just a username and uid/gid.
    ///
    /// Other fields are initialized to sensible defaults.
    pub fn new(username: impl Into<String>, uid: u32, gid: u32) -> Self {
        let username = username.into();
        let home_dir = PathBuf::from(format!("/home/{username}"));
        Self {
            username,
            uid,
            gid,
            groups: Vec::new(),
            shell: PathBuf::from("/bin/sh"),
            home_dir,
            display_name: None,
        }
    }

    /// Set the login shell.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the home directory.
    pub fn with_home_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.home_dir = path.into();
        self
    }

    /// Set the supplementary group IDs.
    pub fn with_groups(mut self, groups: impl Into<Vec<u32>>) -> Self {
        self.groups = groups.into();
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Returns `true` if this is the superuser account.
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Returns `true` if the identity belongs to the given group, either
    /// as its primary group or through a supplementary membership.
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_states() {
        assert!(AuthVerdict::Accept.is_accepted());
        assert!(!AuthVerdict::Accept.is_rejected());

        assert!(AuthVerdict::Reject.is_rejected());
        assert!(!AuthVerdict::Reject.is_partial());

        assert!(AuthVerdict::Partial.is_partial());
        assert!(!AuthVerdict::Partial.is_accepted());

        assert_eq!(AuthVerdict::default(), AuthVerdict::Reject);
    }

    #[test]
    fn test_method_set_membership() {
        let mut set = MethodSet::empty();
        assert!(set.is_empty());
        assert!(!set.contains_name("password"));

        set.insert_password();
        assert!(set.has_password());
        assert!(!set.has_pubkey());
        assert!(set.contains_name("password"));
        assert!(!set.contains_name("publickey"));

        set.insert_pubkey();
        assert!(set.has_pubkey());
    }

    #[test]
    fn test_method_set_none_is_never_a_member() {
        let mut set = MethodSet::empty();
        set.insert_pubkey();
        set.insert_password();
        assert!(!set.contains_name("none"));
        assert!(!set.contains_name("hostbased"));
    }

    #[test]
    fn test_advertised_order_is_fixed() {
        let mut set = MethodSet::empty();
        set.insert_password();
        set.insert_pubkey();
        // Insertion order must not matter.
        assert_eq!(set.advertised(), "publickey,password");

        let mut only_password = MethodSet::empty();
        only_password.insert_password();
        assert_eq!(only_password.advertised(), "password");

        let mut only_pubkey = MethodSet::empty();
        only_pubkey.insert_pubkey();
        assert_eq!(only_pubkey.advertised(), "publickey");

        assert_eq!(MethodSet::empty().advertised(), "");
    }

    #[test]
    fn test_identity_builder() {
        let identity = Identity::new("alice", 1000, 1000)
            .with_shell("/bin/zsh")
            .with_home_dir("/srv/alice")
            .with_groups(vec![4, 27])
            .with_display_name("Alice");

        assert_eq!(identity.username, "alice");
        assert_eq!(identity.uid, 1000);
        assert_eq!(identity.shell, PathBuf::from("/bin/zsh"));
        assert_eq!(identity.home_dir, PathBuf::from("/srv/alice"));
        assert_eq!(identity.display_name, Some("Alice".to_string()));
        assert!(!identity.is_root());
    }

    #[test]
    fn test_identity_group_membership() {
        let identity = Identity::new("alice", 1000, 100).with_groups(vec![4, 27]);

        assert!(identity.in_group(100)); // primary
        assert!(identity.in_group(27)); // supplementary
        assert!(!identity.in_group(0));
    }

    #[test]
    fn test_identity_root() {
        let root = Identity::new("root", 0, 0);
        assert!(root.is_root());
    }
}
