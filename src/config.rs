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

//! Configuration for the authentication gate.
//!
//! All fields have serde defaults so a configuration file only needs to
//! name the settings it changes.
//!
//! # Example YAML
//!
//! ```yaml
//! max_auth_tries: 6
//! password_auth: false
//! allow_root_login: false
//! allowed_group: ssh-users
//! banner: "Authorized use only."
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration consumed by [`AuthGate`](crate::auth::gate::AuthGate).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum authentication attempts before the connection is
    /// terminated.
    ///
    /// Default: 10
    #[serde(default = "default_max_auth_tries")]
    pub max_auth_tries: u32,

    /// Banner text sent once before the first authentication response,
    /// if set.
    #[serde(default)]
    pub banner: Option<String>,

    /// Whether password authentication is administratively enabled.
    ///
    /// Disabling this clears the password method even when a password
    /// verifier is registered.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub password_auth: bool,

    /// Whether the superuser may log in.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub allow_root_login: bool,

    /// If set, only members of this group (primary or supplementary) may
    /// authenticate.
    #[serde(default)]
    pub allowed_group: Option<String>,

    /// Maximum concurrent connections that have not yet authenticated.
    ///
    /// Default: 30
    #[serde(default = "default_max_pre_auth")]
    pub max_pre_auth_connections: usize,

    /// Seconds a connection may spend before completing authentication.
    ///
    /// The gate clears the deadline on success; the connection loop
    /// enforces it. Set to 0 to disable.
    ///
    /// Default: 300
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Base of the anti-enumeration failure delay window, in milliseconds.
    ///
    /// Default: 250
    #[serde(default = "default_fail_delay_ms")]
    pub fail_delay_ms: u64,

    /// Width of the random jitter added to the failure delay, in
    /// milliseconds.
    ///
    /// Default: 100
    #[serde(default = "default_fail_delay_jitter_ms")]
    pub fail_delay_jitter_ms: u64,
}

fn default_max_auth_tries() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_pre_auth() -> usize {
    30
}

fn default_auth_timeout() -> u64 {
    300
}

fn default_fail_delay_ms() -> u64 {
    250
}

fn default_fail_delay_jitter_ms() -> u64 {
    100
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_auth_tries: default_max_auth_tries(),
            banner: None,
            password_auth: true,
            allow_root_login: true,
            allowed_group: None,
            max_pre_auth_connections: default_max_pre_auth(),
            auth_timeout_secs: default_auth_timeout(),
            fail_delay_ms: default_fail_delay_ms(),
            fail_delay_jitter_ms: default_fail_delay_jitter_ms(),
        }
    }
}

impl GateConfig {
    /// The authentication deadline as a duration, or `None` when disabled.
    pub fn auth_timeout(&self) -> Option<Duration> {
        if self.auth_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.auth_timeout_secs))
        }
    }

    /// Validate the configuration and return any warnings.
    ///
    /// Returns a list of warning messages for settings that are legal but
    /// probably not what the operator intended.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.max_auth_tries == 0 {
            warnings.push(
                "max_auth_tries is 0 - every connection will be terminated on its first failure"
                    .to_string(),
            );
        }

        if self.fail_delay_ms == 0 {
            warnings.push(
                "fail_delay_ms is 0 - failure timing will leak verification cost".to_string(),
            );
        }

        if self.max_pre_auth_connections == 0 {
            warnings.push(
                "max_pre_auth_connections is 0 - no connection will be able to authenticate"
                    .to_string(),
            );
        }

        warnings
    }
}
