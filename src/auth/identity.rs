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

//! Identity resolution and login policy enforcement.
//!
//! [`IdentityValidator`] owns the per-connection username state: it
//! resolves the claimed account exactly once, caches the result, pins the
//! connection to that username, and applies the login policies
//! (existence, unprivileged-process restriction, root login, mandatory
//! group, valid shell).
//!
//! [`IdentitySource`] abstracts the system user database so the policy
//! logic is testable without touching `/etc/passwd`;
//! [`SystemIdentitySource`] is the production implementation.
//!
//! # Security
//!
//! - A connection is bound to the first username it presents; switching
//!   is fatal.
//! - A failed check is sticky: repeats are answered from the cached
//!   verdict without further lookups or log lines (log-flood
//!   suppression).
//! - Which policy rejected the user is never visible to the client; the
//!   gate sends the same failure response for every recoverable case.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::shared::auth_types::Identity;
use crate::shared::error::GateError;
use crate::shared::validation::{parse_wire_username, UsernameIssue};

/// Shell used when the account's shell field is empty.
const FALLBACK_SHELL: &str = "/bin/sh";

/// Shells assumed valid when the shells file is absent.
const DEFAULT_SHELLS: &[&str] = &["/bin/sh", "/bin/csh"];

/// Result of a username check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameCheck {
    /// The identity resolved and passed every policy; the cached record
    /// is available.
    Valid,

    /// The request must be answered with a normal authentication failure.
    Invalid,
}

impl UsernameCheck {
    /// Returns `true` for [`UsernameCheck::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, UsernameCheck::Valid)
    }
}

/// Login policies applied after identity resolution.
#[derive(Debug, Clone, Default)]
pub struct IdentityPolicy {
    /// Whether uid 0 may log in.
    pub allow_root_login: bool,

    /// Mandatory group membership, if configured.
    pub allowed_group: Option<String>,
}

/// Read-only view of the system identity database.
///
/// Implementations must be cheap to share across connections.
pub trait IdentitySource: Send + Sync {
    /// Resolve an account by name. `None` when the account does not
    /// exist. The returned record's shell field is taken verbatim from
    /// the database; normalization happens in the validator.
    fn lookup_user(&self, username: &str) -> Option<Identity>;

    /// Resolve a group name to its gid.
    fn group_gid(&self, group: &str) -> Option<u32>;

    /// Whether a shell path appears in the system's list of valid login
    /// shells.
    fn shell_is_valid(&self, shell: &Path) -> bool;

    /// Effective uid of the server process.
    fn process_uid(&self) -> u32;
}

/// Production identity source backed by the system user database.
pub struct SystemIdentitySource {
    shells_file: PathBuf,
    shells: OnceCell<Vec<PathBuf>>,
}

impl SystemIdentitySource {
    /// Create a source reading valid shells from `/etc/shells`.
    pub fn new() -> Self {
        Self::with_shells_file("/etc/shells")
    }

    /// Create a source reading valid shells from the given file.
    pub fn with_shells_file(path: impl Into<PathBuf>) -> Self {
        Self {
            shells_file: path.into(),
            shells: OnceCell::new(),
        }
    }

    fn shells(&self) -> &[PathBuf] {
        self.shells.get_or_init(|| {
            match std::fs::read_to_string(&self.shells_file) {
                Ok(contents) => contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(PathBuf::from)
                    .collect(),
                Err(err) => {
                    debug!(
                        file = %self.shells_file.display(),
                        error = %err,
                        "shells file unreadable, using built-in defaults"
                    );
                    DEFAULT_SHELLS.iter().map(PathBuf::from).collect()
                }
            }
        })
    }
}

impl Default for SystemIdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySource for SystemIdentitySource {
    fn lookup_user(&self, username: &str) -> Option<Identity> {
        let user = nix::unistd::User::from_name(username).ok().flatten()?;

        // Supplementary groups; a lookup failure degrades to the primary
        // group only.
        let groups = CString::new(username)
            .ok()
            .and_then(|name| nix::unistd::getgrouplist(&name, user.gid).ok())
            .map(|gids| gids.iter().map(|gid| gid.as_raw()).collect::<Vec<u32>>())
            .unwrap_or_default();

        let gecos = user.gecos.to_string_lossy();
        let display_name = gecos
            .split(',')
            .next()
            .filter(|field| !field.is_empty())
            .map(str::to_string);

        let mut identity = Identity::new(user.name, user.uid.as_raw(), user.gid.as_raw())
            .with_home_dir(user.dir)
            .with_groups(groups);
        identity.shell = user.shell;
        identity.display_name = display_name;
        Some(identity)
    }

    fn group_gid(&self, group: &str) -> Option<u32> {
        nix::unistd::Group::from_name(group)
            .ok()
            .flatten()
            .map(|g| g.gid.as_raw())
    }

    fn shell_is_valid(&self, shell: &Path) -> bool {
        self.shells().iter().any(|s| s == shell)
    }

    fn process_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }
}

/// Per-connection identity validation state.
pub struct IdentityValidator {
    source: Arc<dyn IdentitySource>,
    policy: IdentityPolicy,

    /// Username pinned by the first request, whether or not it resolved.
    cached_username: Option<String>,

    /// Resolved record; present whenever resolution succeeded, even when
    /// a policy check then failed (the lockout log uses it).
    identity: Option<Identity>,

    /// Sticky failure flag; once set, later checks answer from it.
    check_failed: bool,
}

impl IdentityValidator {
    /// Create a validator for one connection.
    pub fn new(source: Arc<dyn IdentitySource>, policy: IdentityPolicy) -> Self {
        Self {
            source,
            policy,
            cached_username: None,
            identity: None,
            check_failed: false,
        }
    }

    /// Check a wire username against the cached state and the login
    /// policies.
    ///
    /// Fatal conditions (embedded terminator, mid-connection username
    /// switch) surface as `Err`; everything else is a
    /// [`UsernameCheck`] and the connection continues.
    pub fn check_username(&mut self, raw: &[u8]) -> Result<UsernameCheck, GateError> {
        let name = match parse_wire_username(raw) {
            Ok(name) => name,
            Err(UsernameIssue::EmbeddedTerminator) => {
                warn!("rejecting username with embedded terminator");
                return Err(GateError::MalformedUsername);
            }
            Err(issue) => {
                debug!(?issue, "rejecting ill-formed username");
                return Ok(UsernameCheck::Invalid);
            }
        };

        if let Some(cached) = &self.cached_username {
            if cached != name {
                warn!(
                    cached = %cached,
                    "client attempted a second username on the same connection"
                );
                return Err(GateError::UsernameMismatch);
            }
            if self.check_failed {
                // Suppressed: verdict already logged on the first attempt.
                return Ok(UsernameCheck::Invalid);
            }
            return Ok(UsernameCheck::Valid);
        }

        // First request on this connection: pin the username and resolve.
        self.cached_username = Some(name.to_string());

        match self.source.lookup_user(name) {
            Some(mut identity) => {
                if identity.shell.as_os_str().is_empty() {
                    identity.shell = PathBuf::from(FALLBACK_SHELL);
                }
                self.identity = Some(identity);
            }
            None => {
                warn!(user = %name, "login attempt for nonexistent user");
                self.check_failed = true;
                return Ok(UsernameCheck::Invalid);
            }
        }

        if let Err(reason) = self.policy_check() {
            warn!(user = %name, reason, "login refused by policy");
            self.check_failed = true;
            return Ok(UsernameCheck::Invalid);
        }

        Ok(UsernameCheck::Valid)
    }

    fn policy_check(&self) -> Result<(), &'static str> {
        let identity = match &self.identity {
            Some(identity) => identity,
            None => return Err("identity not resolved"),
        };

        let process_uid = self.source.process_uid();
        if process_uid != 0 && identity.uid != process_uid {
            return Err("server runs unprivileged; only its own account may log in");
        }

        if identity.is_root() && !self.policy.allow_root_login {
            return Err("root login is disabled");
        }

        if let Some(group) = &self.policy.allowed_group {
            match self.source.group_gid(group) {
                Some(gid) if identity.in_group(gid) => {}
                Some(_) => return Err("user is not a member of the required group"),
                None => return Err("required group does not exist"),
            }
        }

        if !self.source.shell_is_valid(&identity.shell) {
            return Err("login shell is not a valid system shell");
        }

        Ok(())
    }

    /// The resolved identity, only while no check has failed.
    pub fn validated_identity(&self) -> Option<&Identity> {
        if self.check_failed {
            None
        } else {
            self.identity.as_ref()
        }
    }

    /// Account name for the lockout log line: the resolved name when
    /// resolution succeeded, a placeholder otherwise. Raw wire input is
    /// never returned here.
    pub fn lockout_display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map(|identity| identity.username.as_str())
            .unwrap_or("<unknown>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticSource {
        users: HashMap<String, Identity>,
        groups: HashMap<String, u32>,
        shells: Vec<PathBuf>,
        process_uid: u32,
    }

    impl StaticSource {
        fn new() -> Self {
            let mut users = HashMap::new();
            users.insert(
                "alice".to_string(),
                Identity::new("alice", 1000, 1000).with_shell("/bin/bash"),
            );
            users.insert("root".to_string(), Identity::new("root", 0, 0).with_shell("/bin/bash"));
            Self {
                users,
                groups: HashMap::new(),
                shells: vec![PathBuf::from("/bin/sh"), PathBuf::from("/bin/bash")],
                process_uid: 0,
            }
        }
    }

    impl IdentitySource for StaticSource {
        fn lookup_user(&self, username: &str) -> Option<Identity> {
            self.users.get(username).cloned()
        }

        fn group_gid(&self, group: &str) -> Option<u32> {
            self.groups.get(group).copied()
        }

        fn shell_is_valid(&self, shell: &Path) -> bool {
            self.shells.iter().any(|s| s == shell)
        }

        fn process_uid(&self) -> u32 {
            self.process_uid
        }
    }

    fn validator_with(source: StaticSource, policy: IdentityPolicy) -> IdentityValidator {
        IdentityValidator::new(Arc::new(source), policy)
    }

    fn permissive_policy() -> IdentityPolicy {
        IdentityPolicy {
            allow_root_login: true,
            allowed_group: None,
        }
    }

    #[test]
    fn test_known_user_is_valid_and_cached() {
        let mut validator = validator_with(StaticSource::new(), permissive_policy());

        assert_eq!(
            validator.check_username(b"alice").unwrap(),
            UsernameCheck::Valid
        );
        assert!(validator.validated_identity().is_some());

        // Second check is served from cache.
        assert_eq!(
            validator.check_username(b"alice").unwrap(),
            UsernameCheck::Valid
        );
    }

    #[test]
    fn test_unknown_user_failure_is_sticky() {
        let mut validator = validator_with(StaticSource::new(), permissive_policy());

        assert_eq!(
            validator.check_username(b"mallory").unwrap(),
            UsernameCheck::Invalid
        );
        assert_eq!(
            validator.check_username(b"mallory").unwrap(),
            UsernameCheck::Invalid
        );
        assert!(validator.validated_identity().is_none());
        assert_eq!(validator.lockout_display_name(), "<unknown>");
    }

    #[test]
    fn test_username_switch_is_fatal() {
        let mut validator = validator_with(StaticSource::new(), permissive_policy());

        validator.check_username(b"alice").unwrap();
        let err = validator.check_username(b"root").unwrap_err();
        assert!(matches!(err, GateError::UsernameMismatch));
    }

    #[test]
    fn test_username_switch_after_failure_is_still_fatal() {
        let mut validator = validator_with(StaticSource::new(), permissive_policy());

        validator.check_username(b"mallory").unwrap();
        let err = validator.check_username(b"alice").unwrap_err();
        assert!(matches!(err, GateError::UsernameMismatch));
    }

    #[test]
    fn test_embedded_terminator_is_fatal() {
        let mut validator = validator_with(StaticSource::new(), permissive_policy());

        let err = validator.check_username(b"ali\0ce").unwrap_err();
        assert!(matches!(err, GateError::MalformedUsername));
    }

    #[test]
    fn test_overlong_username_is_recoverable_and_uncached() {
        let mut validator = validator_with(StaticSource::new(), permissive_policy());

        let long = vec![b'a'; 64];
        assert_eq!(
            validator.check_username(&long).unwrap(),
            UsernameCheck::Invalid
        );

        // Nothing was pinned, so a real username still works.
        assert_eq!(
            validator.check_username(b"alice").unwrap(),
            UsernameCheck::Valid
        );
    }

    #[test]
    fn test_root_login_disabled() {
        let policy = IdentityPolicy {
            allow_root_login: false,
            allowed_group: None,
        };
        let mut validator = validator_with(StaticSource::new(), policy);

        assert_eq!(
            validator.check_username(b"root").unwrap(),
            UsernameCheck::Invalid
        );
        // Identity resolved, so the lockout log gets the real name.
        assert_eq!(validator.lockout_display_name(), "root");
        assert!(validator.validated_identity().is_none());
    }

    #[test]
    fn test_group_restriction() {
        let mut source = StaticSource::new();
        source.groups.insert("ssh-users".to_string(), 27);
        let policy = IdentityPolicy {
            allow_root_login: true,
            allowed_group: Some("ssh-users".to_string()),
        };
        let mut validator = validator_with(source, policy);

        // alice's groups are {1000}; not a member.
        assert_eq!(
            validator.check_username(b"alice").unwrap(),
            UsernameCheck::Invalid
        );
    }

    #[test]
    fn test_group_restriction_member_passes() {
        let mut source = StaticSource::new();
        source.groups.insert("ssh-users".to_string(), 27);
        source.users.insert(
            "bob".to_string(),
            Identity::new("bob", 1001, 1001)
                .with_shell("/bin/bash")
                .with_groups(vec![27]),
        );
        let policy = IdentityPolicy {
            allow_root_login: true,
            allowed_group: Some("ssh-users".to_string()),
        };
        let mut validator = validator_with(source, policy);

        assert_eq!(
            validator.check_username(b"bob").unwrap(),
            UsernameCheck::Valid
        );
    }

    #[test]
    fn test_missing_required_group_rejects() {
        let policy = IdentityPolicy {
            allow_root_login: true,
            allowed_group: Some("nonexistent".to_string()),
        };
        let mut validator = validator_with(StaticSource::new(), policy);

        assert_eq!(
            validator.check_username(b"alice").unwrap(),
            UsernameCheck::Invalid
        );
    }

    #[test]
    fn test_invalid_shell_rejects() {
        let mut source = StaticSource::new();
        source.users.insert(
            "bob".to_string(),
            Identity::new("bob", 1001, 1001).with_shell("/opt/weird/shell"),
        );
        let mut validator = validator_with(source, permissive_policy());

        assert_eq!(
            validator.check_username(b"bob").unwrap(),
            UsernameCheck::Invalid
        );
    }

    #[test]
    fn test_empty_shell_falls_back() {
        let mut source = StaticSource::new();
        source.users.insert(
            "bob".to_string(),
            Identity::new("bob", 1001, 1001).with_shell(""),
        );
        let mut validator = validator_with(source, permissive_policy());

        // /bin/sh is in the shells list, so the fallback makes bob valid.
        assert_eq!(
            validator.check_username(b"bob").unwrap(),
            UsernameCheck::Valid
        );
        let identity = validator.validated_identity().unwrap();
        assert_eq!(identity.shell, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_unprivileged_process_restriction() {
        let mut source = StaticSource::new();
        source.process_uid = 1000; // running as alice
        source.users.insert(
            "bob".to_string(),
            Identity::new("bob", 1001, 1001).with_shell("/bin/bash"),
        );
        let mut validator = validator_with(source, permissive_policy());

        // bob is not the process's own account.
        assert_eq!(
            validator.check_username(b"bob").unwrap(),
            UsernameCheck::Invalid
        );
    }

    #[test]
    fn test_unprivileged_process_own_account_passes() {
        let mut source = StaticSource::new();
        source.process_uid = 1000; // running as alice
        let mut validator = validator_with(source, permissive_policy());

        assert_eq!(
            validator.check_username(b"alice").unwrap(),
            UsernameCheck::Valid
        );
    }

    #[test]
    fn test_system_source_shells_file_parsing() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# /etc/shells: valid login shells").unwrap();
        writeln!(file, "/bin/sh").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "/usr/bin/fish").unwrap();

        let source = SystemIdentitySource::with_shells_file(file.path());
        assert!(source.shell_is_valid(Path::new("/bin/sh")));
        assert!(source.shell_is_valid(Path::new("/usr/bin/fish")));
        assert!(!source.shell_is_valid(Path::new("/bin/bash")));
    }

    #[test]
    fn test_system_source_missing_shells_file_uses_defaults() {
        let source = SystemIdentitySource::with_shells_file("/definitely/not/a/file");
        assert!(source.shell_is_valid(Path::new("/bin/sh")));
        assert!(!source.shell_is_valid(Path::new("/usr/bin/fish")));
    }
}
