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

//! Controlling-terminal attachment and terminal device ownership.
//!
//! After authentication, the slave side of the allocated PTY becomes the
//! session's controlling terminal and its ownership moves to the
//! authenticated identity. Ownership transfer is a security boundary: a
//! terminal owned by the wrong user is an unacceptable cross-user
//! privilege state, so ownership failures are fatal except on read-only
//! filesystems whose existing state is already acceptable.
//!
//! All device filesystem operations go through [`DeviceOps`] so the
//! compare-before-write idempotence is testable without privileges.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use nix::libc;
use nix::pty::Winsize;
use nix::sys::signal::{self, SigHandler, Signal};
use tracing::{debug, error, warn};

use crate::pty::alloc::PtySession;
use crate::shared::auth_types::Identity;

/// Mode for a slave owned by (user, tty group): owner read/write, group
/// write.
const MODE_TTY_GROUP: u32 = 0o620;

/// Fallback mode when no tty group exists: owner read/write, group and
/// other write.
const MODE_NO_TTY_GROUP: u32 = 0o622;

/// Mode restored on release: world read/write.
const MODE_RELEASED: u32 = 0o666;

/// Terminal window geometry, as requested by the client.
///
/// Dimensions exceeding `u16::MAX` are clamped when converted to the
/// kernel's winsize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    /// Height in rows.
    pub rows: u32,
    /// Width in columns.
    pub cols: u32,
    /// Width in pixels (may be 0 if unknown).
    pub xpixel: u32,
    /// Height in pixels (may be 0 if unknown).
    pub ypixel: u32,
}

/// Maximum value for terminal dimensions (u16::MAX).
const MAX_DIMENSION: u32 = u16::MAX as u32;

impl Window {
    /// Create a new window geometry.
    pub fn new(rows: u32, cols: u32, xpixel: u32, ypixel: u32) -> Self {
        Self {
            rows,
            cols,
            xpixel,
            ypixel,
        }
    }

    /// Convert to the kernel winsize, clamping oversized dimensions.
    pub fn winsize(&self) -> Winsize {
        Winsize {
            ws_row: self.rows.min(MAX_DIMENSION) as u16,
            ws_col: self.cols.min(MAX_DIMENSION) as u16,
            ws_xpixel: self.xpixel.min(MAX_DIMENSION) as u16,
            ws_ypixel: self.ypixel.min(MAX_DIMENSION) as u16,
        }
    }
}

/// Owner and permission state of a terminal device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Owning uid.
    pub uid: u32,
    /// Owning gid.
    pub gid: u32,
    /// Permission bits (the low nine).
    pub mode: u32,
}

/// Filesystem operations on terminal devices.
///
/// [`SystemDeviceOps`] is the production implementation; tests use a
/// recording fake to observe which syscalls a code path would issue.
pub trait DeviceOps: Send + Sync {
    /// Current owner and mode of the device.
    fn status(&self, path: &Path) -> io::Result<DeviceStatus>;

    /// Change the device's owner.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Change the device's permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// The gid of the system `tty` group, if one exists.
    fn tty_group_gid(&self) -> Option<u32>;
}

/// Production device operations.
pub struct SystemDeviceOps;

impl DeviceOps for SystemDeviceOps {
    fn status(&self, path: &Path) -> io::Result<DeviceStatus> {
        let meta = std::fs::metadata(path)?;
        Ok(DeviceStatus {
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & 0o777,
        })
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    fn tty_group_gid(&self) -> Option<u32> {
        nix::unistd::Group::from_name("tty")
            .ok()
            .flatten()
            .map(|group| group.gid.as_raw())
    }
}

fn open_control_tty(write_only: bool) -> io::Result<OwnedFd> {
    let mut options = OpenOptions::new();
    if write_only {
        options.write(true);
    } else {
        options.read(true).write(true).custom_flags(libc::O_NOCTTY);
    }
    options.open("/dev/tty").map(OwnedFd::from)
}

/// Controlling-terminal and device-ownership management.
pub struct TtyController {
    ops: Arc<dyn DeviceOps>,
}

impl TtyController {
    /// Controller backed by the real filesystem.
    pub fn new() -> Self {
        Self {
            ops: Arc::new(SystemDeviceOps),
        }
    }

    /// Controller with custom device operations (tests).
    pub fn with_ops(ops: Arc<dyn DeviceOps>) -> Self {
        Self { ops }
    }

    /// Make the session's slave the controlling terminal of the calling
    /// process.
    ///
    /// Every step here is advisory: sandboxed or restricted hosts may
    /// legitimately refuse parts of the sequence, and a shell on a
    /// degraded terminal beats no shell. Failures are logged, never
    /// surfaced.
    pub fn make_controlling(&self, session: &mut PtySession) -> Result<()> {
        // Background writes to the controlling terminal raise SIGTTOU;
        // the default disposition would stop the session.
        // SAFETY: SigIgn installs no Rust callback.
        if let Err(err) = unsafe { signal::signal(Signal::SIGTTOU, SigHandler::SigIgn) } {
            warn!(error = %err, "could not ignore SIGTTOU");
        }

        // Explicitly detach from any existing controlling terminal.
        if let Ok(dev_tty) = open_control_tty(false) {
            // SAFETY: the fd is valid for the duration of the call.
            let rc = unsafe { libc::ioctl(dev_tty.as_raw_fd(), libc::TIOCNOTTY, 0) };
            if rc < 0 {
                debug!(
                    error = %io::Error::last_os_error(),
                    "ioctl(TIOCNOTTY) failed"
                );
            }
        }

        if let Err(err) = nix::unistd::setsid() {
            warn!(error = %err, "setsid failed, continuing in the current session");
        }

        // Verify the detach: reopening the control device must fail now.
        if open_control_tty(false).is_ok() {
            error!("failed to disconnect from controlling tty");
        }

        // SAFETY: the slave fd is valid; TIOCSCTTY takes an int argument.
        let rc = unsafe { libc::ioctl(session.slave_fd().as_raw_fd(), libc::TIOCSCTTY, 0) };
        if rc < 0 {
            warn!(
                error = %io::Error::last_os_error(),
                "ioctl(TIOCSCTTY) failed"
            );
        }

        if !self.controlling_tty_attached() {
            self.hangup_reattach(session);
        }

        if !self.controlling_tty_attached() {
            error!(
                tty = %session.slave_name(),
                "open /dev/tty failed - could not set controlling tty"
            );
        }

        Ok(())
    }

    fn controlling_tty_attached(&self) -> bool {
        open_control_tty(true).is_ok()
    }

    /// Force reattachment with a transient hangup cycle and swap the
    /// freshly reopened slave into the session.
    #[cfg(target_os = "linux")]
    fn hangup_reattach(&self, session: &mut PtySession) {
        // SAFETY: SigIgn installs no Rust callback; the previous handler
        // is restored below.
        let old = unsafe { signal::signal(Signal::SIGHUP, SigHandler::SigIgn) };

        // SAFETY: no arguments; requires CAP_SYS_TTY_CONFIG.
        let rc = unsafe { libc::vhangup() };

        if let Ok(previous) = old {
            // SAFETY: restoring the handler captured above.
            let _ = unsafe { signal::signal(Signal::SIGHUP, previous) };
        }

        if rc < 0 {
            debug!(
                error = %io::Error::last_os_error(),
                "vhangup failed, keeping the original slave descriptor"
            );
            return;
        }

        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(session.slave_name())
        {
            Ok(file) => {
                session.replace_slave(OwnedFd::from(file));
                // SAFETY: the fresh slave fd is valid.
                let rc =
                    unsafe { libc::ioctl(session.slave_fd().as_raw_fd(), libc::TIOCSCTTY, 0) };
                if rc < 0 {
                    warn!(
                        error = %io::Error::last_os_error(),
                        "ioctl(TIOCSCTTY) after hangup failed"
                    );
                }
            }
            Err(err) => {
                warn!(
                    tty = %session.slave_name(),
                    error = %err,
                    "could not reopen slave after hangup"
                );
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn hangup_reattach(&self, _session: &mut PtySession) {}

    /// Transfer the slave device to the authenticated identity.
    ///
    /// Target state is `(uid, tty-group, 0o620)` when a `tty` group
    /// exists, else `(uid, primary gid, 0o622)`. Syscalls are issued only
    /// when the current state differs, so a repeat call with unchanged
    /// state touches nothing. A read-only filesystem is tolerated only
    /// while the existing state is acceptable; every other failure is
    /// fatal.
    pub fn set_ownership(&self, identity: &Identity, slave_name: &str) -> Result<()> {
        let path = Path::new(slave_name);

        let (gid, mode) = match self.ops.tty_group_gid() {
            Some(tty_gid) => (tty_gid, MODE_TTY_GROUP),
            None => (identity.gid, MODE_NO_TTY_GROUP),
        };

        let current = self
            .ops
            .status(path)
            .with_context(|| format!("stat({slave_name}) failed"))?;

        if current.uid != identity.uid || !(current.gid == gid || current.gid == identity.gid) {
            if let Err(err) = self.ops.chown(path, identity.uid, gid) {
                if err.raw_os_error() == Some(libc::EROFS)
                    && (current.uid == identity.uid || current.uid == 0)
                {
                    warn!(
                        tty = %slave_name,
                        uid = identity.uid,
                        gid,
                        error = %err,
                        "chown on read-only filesystem, existing owner acceptable"
                    );
                } else {
                    bail!("chown({slave_name}, {}, {gid}) failed: {err}", identity.uid);
                }
            }
        }

        if current.mode != mode {
            if let Err(err) = self.ops.chmod(path, mode) {
                if err.raw_os_error() == Some(libc::EROFS) && (current.mode & 0o044) == 0 {
                    warn!(
                        tty = %slave_name,
                        mode = format!("{mode:o}"),
                        error = %err,
                        "chmod on read-only filesystem, existing mode acceptable"
                    );
                } else {
                    bail!("chmod({slave_name}, {mode:o}) failed: {err}");
                }
            }
        }

        Ok(())
    }

    /// Apply a window geometry to the master. Best-effort; a failure is
    /// logged and never surfaced.
    pub fn change_window_size(&self, master: BorrowedFd<'_>, window: &Window) {
        let winsize = window.winsize();
        // SAFETY: the fd is valid and winsize is a valid struct for the
        // duration of the call.
        let rc = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };
        if rc < 0 {
            warn!(
                error = %io::Error::last_os_error(),
                rows = window.rows,
                cols = window.cols,
                "ioctl(TIOCSWINSZ) failed"
            );
        }
    }

    /// Return the slave device to its pre-session state: superuser
    /// ownership, world read/write. An already-removed device is not an
    /// error.
    pub fn release(&self, slave_name: &str) {
        let path = Path::new(slave_name);

        if let Err(err) = self.ops.chown(path, 0, 0) {
            if err.kind() != io::ErrorKind::NotFound {
                error!(tty = %slave_name, error = %err, "chown 0:0 on release failed");
            }
        }

        if let Err(err) = self.ops.chmod(path, MODE_RELEASED) {
            if err.kind() != io::ErrorKind::NotFound {
                error!(tty = %slave_name, error = %err, "chmod 0666 on release failed");
            }
        }
    }
}

impl Default for TtyController {
    fn default() -> Self {
        Self::new()
    }
}
