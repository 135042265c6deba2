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

//! Validation of wire-supplied usernames.
//!
//! A username arrives from the wire as a length-prefixed byte string. The
//! declared length is the slice length; the *natural* length ends at the
//! first NUL byte. A mismatch between the two is not a bad credential - it
//! is an attempt to smuggle a different string past logging or policy
//! layers, and callers must treat it as fatal.

/// Maximum accepted username length in bytes (POSIX portable limit).
pub const MAX_USERNAME_LEN: usize = 32;

/// Why a wire username was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameIssue {
    /// Declared length exceeds [`MAX_USERNAME_LEN`]. Recoverable.
    TooLong,

    /// An embedded NUL terminator before the declared end. Fatal.
    EmbeddedTerminator,

    /// Not valid UTF-8, or outside the POSIX portable character set.
    /// Recoverable.
    InvalidCharacters,
}

/// Decode a wire username into a validated `&str`.
///
/// Checks, in order:
/// 1. declared length bound ([`UsernameIssue::TooLong`]);
/// 2. embedded NUL ([`UsernameIssue::EmbeddedTerminator`]);
/// 3. UTF-8 and the POSIX portable set: alphanumeric, `.`, `_`, `-`, not
///    empty, not starting with a hyphen
///    ([`UsernameIssue::InvalidCharacters`]).
///
/// # Examples
///
/// ```
/// use bgate::shared::validation::{parse_wire_username, UsernameIssue};
///
/// assert_eq!(parse_wire_username(b"alice"), Ok("alice"));
/// assert_eq!(
///     parse_wire_username(b"ali\0ce"),
///     Err(UsernameIssue::EmbeddedTerminator)
/// );
/// ```
pub fn parse_wire_username(raw: &[u8]) -> Result<&str, UsernameIssue> {
    if raw.len() > MAX_USERNAME_LEN {
        return Err(UsernameIssue::TooLong);
    }

    if raw.contains(&0) {
        return Err(UsernameIssue::EmbeddedTerminator);
    }

    let name = std::str::from_utf8(raw).map_err(|_| UsernameIssue::InvalidCharacters)?;

    if name.is_empty() || name.starts_with('-') {
        return Err(UsernameIssue::InvalidCharacters);
    }

    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid {
        return Err(UsernameIssue::InvalidCharacters);
    }

    Ok(name)
}
