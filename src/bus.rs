//! The serial-bus primitives, independent of the adapter in use.
//!
//! A `Session` owns one resolved backend and forwards every bus operation
//! to it.  Failures reported by the backend are passed through unchanged;
//! nothing at this level retries.

use std::fmt;
use std::io;

use log::debug;

use crate::backend::{
    Backend, Canceller, Features, IecLines, ParallelBurst, ParallelPort, Resolved, Resolver,
    SrqBurst, Tape,
};
use crate::config::AdapterSpec;
use crate::error::CbmError;

/// An open connection to a serial bus through one adapter.
pub struct Session {
    resolved: Option<Resolved>,
    canceller: Option<Canceller>,
}

impl Session {
    /// Open the adapter named by `spec`, using the built-in backends and
    /// the configuration found in the environment.
    pub fn connect(spec: &AdapterSpec) -> io::Result<Session> {
        Session::connect_with(&Resolver::from_env()?, spec)
    }

    pub fn connect_with(resolver: &Resolver, spec: &AdapterSpec) -> io::Result<Session> {
        Ok(Session::from_resolved(resolver.resolve(spec)?))
    }

    pub fn from_resolved(mut resolved: Resolved) -> Session {
        let canceller = resolved.backend().canceller();
        Session {
            resolved: Some(resolved),
            canceller,
        }
    }

    /// Release the adapter.  Every later operation fails with `NoBackend`.
    pub fn close(&mut self) {
        if let Some(resolved) = self.resolved.take() {
            debug!("closing session on {}", resolved.spec());
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved.is_some()
    }

    fn resolved(&mut self) -> io::Result<&mut Resolved> {
        self.resolved
            .as_mut()
            .ok_or_else(|| CbmError::NoBackend.to_io_error())
    }

    fn backend(&mut self) -> io::Result<&mut dyn Backend> {
        Ok(self.resolved()?.backend())
    }

    /// Describe the device this session's adapter spec refers to.
    pub fn driver_name(&mut self) -> io::Result<String> {
        let resolved = self.resolved()?;
        let port = resolved.spec().port.clone();
        resolved.backend().driver_name(port.as_deref())
    }

    pub fn features(&self) -> io::Result<Features> {
        self.resolved
            .as_ref()
            .map(Resolved::features)
            .ok_or_else(|| CbmError::NoBackend.to_io_error())
    }

    /// A handle that another thread may use to abandon a blocked status
    /// wait.  The next `reset` clears it.
    pub fn canceller(&self) -> Option<Canceller> {
        if self.resolved.is_some() {
            self.canceller.clone()
        } else {
            None
        }
    }

    pub fn lock(&mut self) -> io::Result<()> {
        self.backend()?.lock();
        Ok(())
    }

    pub fn unlock(&mut self) -> io::Result<()> {
        self.backend()?.unlock();
        Ok(())
    }

    /// Write bytes to the current listener.  The count may be short.
    pub fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.backend()?.raw_write(data)
    }

    /// Read bytes from the current talker.  A short count is normal at end
    /// of information; check `get_eoi` to tell it apart from a bus error.
    pub fn raw_read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.backend()?.raw_read(buffer)
    }

    pub fn listen(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.backend()?.listen(device, secondary)
    }

    pub fn talk(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.backend()?.talk(device, secondary)
    }

    /// Open a channel.  When a file name is given it is sent to the device
    /// and the device is unlistened.
    pub fn open(&mut self, device: u8, secondary: u8, filename: Option<&[u8]>) -> io::Result<()> {
        let backend = self.backend()?;
        backend.open(device, secondary)?;
        if let Some(filename) = filename {
            let written = if filename.is_empty() {
                0
            } else {
                backend.raw_write(filename)?
            };
            backend.unlisten()?;
            if written != filename.len() {
                return Err(CbmError::BusError.into());
            }
        }
        Ok(())
    }

    pub fn close_channel(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.backend()?.close(device, secondary)
    }

    pub fn unlisten(&mut self) -> io::Result<()> {
        self.backend()?.unlisten()
    }

    pub fn untalk(&mut self) -> io::Result<()> {
        self.backend()?.untalk()
    }

    pub fn get_eoi(&mut self) -> io::Result<bool> {
        self.backend()?.get_eoi()
    }

    pub fn clear_eoi(&mut self) -> io::Result<()> {
        self.backend()?.clear_eoi()
    }

    /// Reset every device on the bus.  A wait abandoned through the
    /// canceller is flushed first.
    pub fn reset(&mut self) -> io::Result<()> {
        self.backend()?.reset()
    }

    pub fn iec_poll(&mut self) -> io::Result<IecLines> {
        self.backend()?.iec_poll()
    }

    /// Whether any of `line` is currently active.
    pub fn iec_get(&mut self, line: IecLines) -> io::Result<bool> {
        Ok(self.iec_poll()?.intersects(line))
    }

    pub fn iec_set(&mut self, line: IecLines) -> io::Result<()> {
        self.backend()?.iec_set(line)
    }

    pub fn iec_release(&mut self, line: IecLines) -> io::Result<()> {
        self.backend()?.iec_release(line)
    }

    /// Set and release lines in one step.  A line in both masks has an
    /// undefined result.
    pub fn iec_setrelease(&mut self, set: IecLines, release: IecLines) -> io::Result<()> {
        self.backend()?.iec_setrelease(set, release)
    }

    pub fn iec_wait(&mut self, line: IecLines, state: bool) -> io::Result<IecLines> {
        self.backend()?.iec_wait(line, state)
    }

    pub fn parallel_burst(&mut self) -> io::Result<&mut dyn ParallelBurst> {
        self.backend()?
            .parallel_burst()
            .ok_or_else(|| CbmError::NotSupported.to_io_error())
    }

    pub fn parallel_port(&mut self) -> io::Result<&mut dyn ParallelPort> {
        self.backend()?
            .parallel_port()
            .ok_or_else(|| CbmError::NotSupported.to_io_error())
    }

    pub fn srq_burst(&mut self) -> io::Result<&mut dyn SrqBurst> {
        self.backend()?
            .srq_burst()
            .ok_or_else(|| CbmError::NotSupported.to_io_error())
    }

    pub fn tape(&mut self) -> io::Result<&mut dyn Tape> {
        self.backend()?
            .tape()
            .ok_or_else(|| CbmError::NotSupported.to_io_error())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("resolved", &self.resolved)
            .finish()
    }
}
