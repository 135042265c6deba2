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

//! Pseudo-terminal allocation.
//!
//! Allocation strategies form an ordered ladder probed at runtime: the
//! combined allocate-and-name primitive first, then the `/dev/ptmx`
//! multiplexer sequence, then the legacy fixed-path device scan. A
//! strategy that fails part-way must not leak descriptors; every
//! descriptor is held as an `OwnedFd` from the moment it is opened, so an
//! early return closes whatever the attempt had opened.

use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nix::libc;
use tracing::{debug, warn};

/// Upper bound on the slave device name, terminator included.
pub const SLAVE_NAME_MAX: usize = 64;

/// An allocated pseudo-terminal pair.
///
/// The session exclusively owns both descriptors until
/// [`into_parts`](PtySession::into_parts) hands them to the channel
/// layer. Dropping the session closes both sides.
pub struct PtySession {
    master: OwnedFd,
    slave: OwnedFd,
    slave_name: String,
}

impl PtySession {
    /// Assemble a session from freshly opened descriptors.
    ///
    /// Fails when the slave name does not fit [`SLAVE_NAME_MAX`]; the
    /// caller's descriptors are dropped (closed) in that case.
    pub fn new(master: OwnedFd, slave: OwnedFd, slave_name: String) -> Result<Self> {
        if slave_name.len() >= SLAVE_NAME_MAX {
            bail!(
                "slave terminal name exceeds {} bytes: {}",
                SLAVE_NAME_MAX,
                slave_name.len()
            );
        }
        Ok(Self {
            master,
            slave,
            slave_name,
        })
    }

    /// The master side, driven by the server.
    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// The slave side, presented to the shell.
    pub fn slave_fd(&self) -> BorrowedFd<'_> {
        self.slave.as_fd()
    }

    /// Path of the slave device.
    pub fn slave_name(&self) -> &str {
        &self.slave_name
    }

    /// Swap in a replacement slave descriptor, closing the old one.
    ///
    /// Used by the controlling-terminal hangup cycle, which invalidates
    /// the original descriptor.
    pub fn replace_slave(&mut self, slave: OwnedFd) {
        self.slave = slave;
    }

    /// Hand the descriptors and name to the channel layer.
    pub fn into_parts(self) -> (OwnedFd, OwnedFd, String) {
        (self.master, self.slave, self.slave_name)
    }
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("master", &self.master.as_raw_fd())
            .field("slave", &self.slave.as_raw_fd())
            .field("slave_name", &self.slave_name)
            .finish()
    }
}

/// One way of obtaining a pseudo-terminal pair.
///
/// Implementations must close everything they opened before returning an
/// error; holding descriptors as `OwnedFd` and returning with `?` is
/// sufficient.
pub trait PtyStrategy: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &'static str;

    /// Attempt an allocation.
    fn try_allocate(&self) -> Result<PtySession>;
}

/// Open a terminal device read-write without acquiring it as the
/// controlling terminal.
fn open_tty_noctty(path: &Path) -> std::io::Result<OwnedFd> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .map(OwnedFd::from)
}

/// Hosts with a STREAMS terminal stack need the terminal-emulation
/// modules pushed onto the slave before it behaves like a tty. A push
/// failure leaves a degraded but usable terminal.
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
fn push_line_discipline(slave: BorrowedFd<'_>) {
    const MODULES: &[&[u8]] = &[b"ptem\0", b"ldterm\0", b"ttcompat\0"];
    for module in MODULES {
        // SAFETY: the fd is valid and the module name is NUL-terminated.
        let rc = unsafe {
            libc::ioctl(
                slave.as_raw_fd(),
                libc::I_PUSH,
                module.as_ptr() as *const libc::c_char,
            )
        };
        if rc < 0 {
            warn!(
                error = %std::io::Error::last_os_error(),
                "ioctl(I_PUSH) failed, terminal may lack line discipline"
            );
        }
    }
}

#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
fn push_line_discipline(_slave: BorrowedFd<'_>) {}

/// The combined allocate-and-name primitive (`openpty`).
pub struct OpenptyStrategy;

impl PtyStrategy for OpenptyStrategy {
    fn name(&self) -> &'static str {
        "openpty"
    }

    fn try_allocate(&self) -> Result<PtySession> {
        let nix::pty::OpenptyResult { master, slave } =
            nix::pty::openpty(None, None).context("openpty failed")?;

        let slave_name = nix::unistd::ttyname(slave.as_fd())
            .context("could not resolve slave tty name")?
            .to_string_lossy()
            .into_owned();

        PtySession::new(master, slave, slave_name)
    }
}

/// The `/dev/ptmx` multiplexer sequence: open master, grant, unlock,
/// query the slave name, open the slave.
pub struct PtmxStrategy;

impl PtyStrategy for PtmxStrategy {
    fn name(&self) -> &'static str {
        "ptmx"
    }

    fn try_allocate(&self) -> Result<PtySession> {
        use nix::fcntl::OFlag;

        let ptm = nix::pty::posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .context("posix_openpt failed")?;
        nix::pty::grantpt(&ptm).context("grantpt failed")?;
        nix::pty::unlockpt(&ptm).context("unlockpt failed")?;
        let slave_name = nix::pty::ptsname_r(&ptm).context("ptsname failed")?;

        // SAFETY: into_raw_fd relinquishes ownership of the descriptor,
        // which OwnedFd takes over.
        let master = unsafe { OwnedFd::from_raw_fd(ptm.into_raw_fd()) };

        let slave = open_tty_noctty(Path::new(&slave_name))
            .with_context(|| format!("error opening pts {slave_name}"))?;

        push_line_discipline(slave.as_fd());

        PtySession::new(master, slave, slave_name)
    }
}

/// Legacy fixed-path scan over `/dev/pty[p-e][0-f]` with the paired
/// `/dev/tty[p-e][0-f]` slave.
pub struct LegacyScanStrategy;

const PTY_MAJORS: &[u8] = b"pqrstuvwxyzabcde";
const PTY_MINORS: &[u8] = b"0123456789abcdef";

impl PtyStrategy for LegacyScanStrategy {
    fn name(&self) -> &'static str {
        "legacy-scan"
    }

    fn try_allocate(&self) -> Result<PtySession> {
        for major in PTY_MAJORS {
            for minor in PTY_MINORS {
                let suffix = format!("{}{}", *major as char, *minor as char);
                let master_path = format!("/dev/pty{suffix}");

                let master = match open_tty_noctty(Path::new(&master_path)) {
                    Ok(fd) => fd,
                    // In-use or absent; keep scanning.
                    Err(_) => continue,
                };

                let slave_name = format!("/dev/tty{suffix}");
                let slave = open_tty_noctty(Path::new(&slave_name)).with_context(|| {
                    format!("master {master_path} opened but slave {slave_name} did not")
                })?;

                return PtySession::new(master, slave, slave_name);
            }
        }
        bail!("no legacy pty device available");
    }
}

/// Ordered, runtime-probed pseudo-terminal allocator.
pub struct PtyAllocator {
    strategies: Vec<Box<dyn PtyStrategy>>,
}

impl PtyAllocator {
    /// Allocator with the built-in strategy ladder.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(OpenptyStrategy),
                Box::new(PtmxStrategy),
                Box::new(LegacyScanStrategy),
            ],
        }
    }

    /// Allocator with a custom strategy ladder, tried in order.
    pub fn with_strategies(strategies: Vec<Box<dyn PtyStrategy>>) -> Self {
        Self { strategies }
    }

    /// Allocate a pseudo-terminal pair.
    ///
    /// Strategies are tried in order; a failed attempt closes its own
    /// descriptors before the next one runs. Fails only when every
    /// strategy is exhausted.
    pub fn allocate(&self) -> Result<PtySession> {
        for strategy in &self.strategies {
            match strategy.try_allocate() {
                Ok(session) => {
                    debug!(
                        strategy = strategy.name(),
                        slave = session.slave_name(),
                        "allocated pseudo-terminal"
                    );
                    return Ok(session);
                }
                Err(err) => {
                    warn!(
                        strategy = strategy.name(),
                        error = %format!("{err:#}"),
                        "pty allocation strategy failed"
                    );
                }
            }
        }
        bail!("no pseudo-terminal allocation strategy succeeded");
    }
}

impl Default for PtyAllocator {
    fn default() -> Self {
        Self::new()
    }
}
