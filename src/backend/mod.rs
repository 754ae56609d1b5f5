//! The contract between the bus protocol layer and adapter implementations.
//!
//! Every adapter implements `Backend`, which carries the mandatory bus
//! operations.  Optional capabilities come in all-or-nothing groups, each
//! with its own trait reached through a typed accessor.  A backend also
//! reports the set of operations it exports; the `Resolver` checks that set
//! before a backend is handed to a `Session`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::CbmError;

mod capability;
mod resolver;

pub use self::capability::{validate, Exports, FeatureGroup, Features};
pub use self::resolver::{Factory, Registry, Resolved, Resolver};

bitflags! {
    /// Lines of the serial bus, as used by the line-control operations.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct IecLines: u8 {
        const DATA = 0x01;
        const CLOCK = 0x02;
        const ATN = 0x04;
        const RESET = 0x08;
    }
}

impl IecLines {
    /// Parse a line name as accepted on the command line.
    pub fn from_line_name(name: &str) -> Option<IecLines> {
        match name.to_ascii_lowercase().as_str() {
            "data" => Some(IecLines::DATA),
            "clock" | "clk" => Some(IecLines::CLOCK),
            "atn" => Some(IecLines::ATN),
            "reset" | "rst" => Some(IecLines::RESET),
            _ => None,
        }
    }
}

/// A request to abandon a blocking wait, usable from another thread.
#[derive(Clone, Debug, Default)]
pub struct Canceller(Arc<AtomicBool>);

impl Canceller {
    pub fn new() -> Canceller {
        Canceller::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Consume a pending request, returning whether there was one.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Outcome of a firmware-assisted transfer that reports both a status word
/// and a byte count, such as a tape capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtendedTransfer {
    pub status: u16,
    pub bytes: usize,
}

/// The operations every adapter must provide.
pub trait Backend: Send {
    /// The operations this backend implements.
    fn exports(&self) -> Exports;

    /// Describe the device a given port specification would open.
    fn driver_name(&mut self, port: Option<&str>) -> io::Result<String>;
    fn driver_open(&mut self, port: Option<&str>) -> io::Result<()>;
    fn driver_close(&mut self);

    fn raw_write(&mut self, data: &[u8]) -> io::Result<usize>;
    fn raw_read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    fn open(&mut self, device: u8, secondary: u8) -> io::Result<()>;
    fn close(&mut self, device: u8, secondary: u8) -> io::Result<()>;
    fn listen(&mut self, device: u8, secondary: u8) -> io::Result<()>;
    fn talk(&mut self, device: u8, secondary: u8) -> io::Result<()>;
    fn unlisten(&mut self) -> io::Result<()>;
    fn untalk(&mut self) -> io::Result<()>;

    fn get_eoi(&mut self) -> io::Result<bool>;
    fn clear_eoi(&mut self) -> io::Result<()>;
    fn reset(&mut self) -> io::Result<()>;

    fn iec_poll(&mut self) -> io::Result<IecLines>;
    fn iec_setrelease(&mut self, set: IecLines, release: IecLines) -> io::Result<()>;
    /// Block until `line` reaches `state`, returning the lines seen then.
    fn iec_wait(&mut self, line: IecLines, state: bool) -> io::Result<IecLines>;

    /// Called before opening, only when `exports()` names `INIT`.
    fn init(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called after closing or a failed open, only when `exports()` names
    /// `UNINIT`.
    fn uninit(&mut self) {}

    fn lock(&mut self) {}

    fn unlock(&mut self) {}

    fn iec_set(&mut self, line: IecLines) -> io::Result<()> {
        self.iec_setrelease(line, IecLines::empty())
    }

    fn iec_release(&mut self, line: IecLines) -> io::Result<()> {
        self.iec_setrelease(IecLines::empty(), line)
    }

    fn canceller(&self) -> Option<Canceller> {
        None
    }

    fn parallel_burst(&mut self) -> Option<&mut dyn ParallelBurst> {
        None
    }

    fn parallel_port(&mut self) -> Option<&mut dyn ParallelPort> {
        None
    }

    fn srq_burst(&mut self) -> Option<&mut dyn SrqBurst> {
        None
    }

    fn tape(&mut self) -> Option<&mut dyn Tape> {
        None
    }
}

/// Byte and track transfers over the parallel cable of a speeder drive.
pub trait ParallelBurst {
    fn read(&mut self) -> io::Result<u8>;
    fn write(&mut self, value: u8) -> io::Result<()>;
    fn read_track(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
    fn write_track(&mut self, data: &[u8]) -> io::Result<usize>;

    fn read_n(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        for byte in buffer.iter_mut() {
            *byte = self.read()?;
        }
        Ok(buffer.len())
    }

    fn write_n(&mut self, data: &[u8]) -> io::Result<usize> {
        for &byte in data {
            self.write(byte)?;
        }
        Ok(data.len())
    }

    /// Read a track that ends early once the drive sees its end marker.
    fn read_track_var(&mut self, _buffer: &mut [u8]) -> io::Result<usize> {
        Err(CbmError::NotSupported.into())
    }
}

/// Direct access to the parallel data port.
pub trait ParallelPort {
    fn pp_read(&mut self) -> io::Result<u8>;
    fn pp_write(&mut self, value: u8) -> io::Result<()>;
}

/// Byte and track transfers using the fast serial (SRQ) protocol.
pub trait SrqBurst {
    fn read(&mut self) -> io::Result<u8>;
    fn write(&mut self, value: u8) -> io::Result<()>;
    fn read_track(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
    fn write_track(&mut self, data: &[u8]) -> io::Result<usize>;

    fn read_n(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        for byte in buffer.iter_mut() {
            *byte = self.read()?;
        }
        Ok(buffer.len())
    }

    fn write_n(&mut self, data: &[u8]) -> io::Result<usize> {
        for &byte in data {
            self.write(byte)?;
        }
        Ok(data.len())
    }
}

/// Datasette access.  Status values are passed through from the adapter.
pub trait Tape {
    fn prepare_capture(&mut self) -> io::Result<u16>;
    fn prepare_write(&mut self) -> io::Result<u16>;
    fn get_sense(&mut self) -> io::Result<u16>;
    fn wait_for_stop_sense(&mut self) -> io::Result<u16>;
    fn wait_for_play_sense(&mut self) -> io::Result<u16>;
    fn motor_on(&mut self) -> io::Result<u16>;
    fn motor_off(&mut self) -> io::Result<u16>;
    fn start_capture(&mut self, buffer: &mut [u8]) -> io::Result<ExtendedTransfer>;
    fn start_write(&mut self, data: &[u8]) -> io::Result<ExtendedTransfer>;
    fn get_ver(&mut self) -> io::Result<u16>;
    fn download_config(&mut self, buffer: &mut [u8]) -> io::Result<ExtendedTransfer>;
    fn upload_config(&mut self, data: &[u8]) -> io::Result<ExtendedTransfer>;
    /// Abandon the tape operation in progress.
    fn tap_break(&mut self) -> io::Result<()>;
}
