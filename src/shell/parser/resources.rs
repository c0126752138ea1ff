use std::os::fd::RawFd;

use log::{debug, warn};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::close;

use super::ast::MAX_CMDS;
use crate::shell::error::ParseError;

/// Three slots per command plus one spare.
pub const MAX_FDS: usize = MAX_CMDS * 3 + 1;

/// Every descriptor opened while building one command line.
///
/// A descriptor is listed at most once. Children close the whole list before
/// `exec`; the parent closes what is left once the line has run. Dropping the
/// tracker closes whatever it still holds.
#[derive(Debug)]
pub struct ResourceTracker {
    fds: Vec<RawFd>,
    capacity: usize,
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::new(),
            capacity,
        }
    }

    /// Takes ownership of `fd`. When the tracker is full `fd` is closed right away.
    pub fn add(&mut self, fd: RawFd) -> Result<(), ParseError> {
        if self.fds.contains(&fd) {
            return Ok(());
        }
        if self.fds.len() >= self.capacity {
            if let Err(e) = close(fd) {
                warn!("close({}) failed: {}", fd, e);
            }
            return Err(ParseError::TooManyDescriptors(self.capacity));
        }
        if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            warn!("cannot set close-on-exec on {}: {}", fd, e);
        }
        self.fds.push(fd);
        Ok(())
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.fds.contains(&fd)
    }

    pub fn fds(&self) -> &[RawFd] {
        &self.fds
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Closes `fd` now if it is tracked. Untracked descriptors are left alone.
    pub fn release(&mut self, fd: RawFd) -> bool {
        match self.fds.iter().position(|&tracked| tracked == fd) {
            Some(pos) => {
                self.fds.swap_remove(pos);
                if let Err(e) = close(fd) {
                    warn!("close({}) failed: {}", fd, e);
                }
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        if !self.fds.is_empty() {
            debug!("closing tracked descriptors {:?}", self.fds);
        }
        for fd in self.fds.drain(..) {
            if let Err(e) = close(fd) {
                warn!("close({}) failed: {}", fd, e);
            }
        }
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        self.close_all();
    }
}
