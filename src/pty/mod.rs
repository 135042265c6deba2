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

//! Pseudo-terminal allocation and controlling-terminal management.
//!
//! This runs after authentication, when the client requests an
//! interactive channel: [`PtyAllocator`] probes the host's terminal
//! facilities to produce a master/slave pair, and [`TtyController`]
//! attaches the slave as the session's controlling terminal and transfers
//! its ownership to the authenticated identity.
//!
//! # Platform Support
//!
//! POSIX PTY APIs; Unix-specific.
//!
//! [`PtyAllocator`]: alloc::PtyAllocator
//! [`TtyController`]: tty::TtyController

pub mod alloc;
pub mod tty;

pub use alloc::{PtyAllocator, PtySession, PtyStrategy};
pub use tty::{DeviceOps, SystemDeviceOps, TtyController, Window};
