//! A simulated CBM drive on a simulated bus, for exercising the bus layer
//! without hardware.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use cbmbus::backend::{Exports, Registry, Resolver};
use cbmbus::{AdapterSpec, Backend, CbmError, Config, IecLines, Session};

pub const DRIVE: u8 = 8;
pub const NAME: &str = "sim";

/// The mandatory operations plus the init/uninit hooks.
pub const HOOKED: Exports = Exports::MANDATORY.union(Exports::INIT).union(Exports::UNINIT);

const OK_STATUS: &[u8] = b"00, OK,00,00\r";
const POWER_ON_STATUS: &[u8] = b"73,CBM DOS V2.6 1541,00,00\r";
const SYNTAX_ERROR_STATUS: &[u8] = b"31,SYNTAX ERROR,00,00\r";

/// Bus traffic seen by the drive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Listen(u8, u8),
    Talk(u8, u8),
    Open(u8, u8),
    Close(u8, u8),
    Write(Vec<u8>),
    Unlisten,
    Untalk,
    Reset,
}

pub struct DriveState {
    pub memory: Vec<u8>,
    pub status: Vec<u8>,
    /// Addresses that make an `M-R` spanning them stop with a CR, like the
    /// $02D4 handling of the 1541 ROM.
    pub quirks: Vec<u16>,
    pub events: Vec<Event>,
    pub lines: IecLines,
    pub eoi: bool,
    pub opened: bool,
    pub closed: bool,
    pub uninits: usize,
    pub init_fails: bool,
    pub open_fails: bool,
    listening: Option<u8>,
    talking: Option<u8>,
    received: Vec<u8>,
    outgoing: VecDeque<u8>,
}

impl DriveState {
    fn new() -> DriveState {
        let mut memory = vec![0u8; 0x10000];
        for (i, byte) in memory.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(7).wrapping_add((i >> 8) as u8);
        }
        let mut state = DriveState {
            memory,
            status: POWER_ON_STATUS.to_vec(),
            quirks: Vec::new(),
            events: Vec::new(),
            lines: IecLines::empty(),
            eoi: false,
            opened: false,
            closed: false,
            uninits: 0,
            init_fails: false,
            open_fails: false,
            listening: None,
            talking: None,
            received: Vec::new(),
            outgoing: VecDeque::new(),
        };
        state.set_footprint(0xf00f);
        state
    }

    /// Store the ROM bytes `identify` reads at $FF40.
    pub fn set_footprint(&mut self, footprint: u16) {
        let [low, high] = footprint.to_le_bytes();
        self.memory[0xFF40] = low;
        self.memory[0xFF41] = high;
    }

    pub fn set_irq_vector(&mut self, vector: u16) {
        let [low, high] = vector.to_le_bytes();
        self.memory[0xFFFE] = low;
        self.memory[0xFFFF] = high;
    }

    /// The `M-W`/`M-R` commands and the data slices the drive received.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn execute(&mut self) {
        let command = std::mem::take(&mut self.received);
        if command.len() >= 6 && &command[..3] == b"M-W" {
            let address = usize::from(u16::from_le_bytes([command[3], command[4]]));
            let data = &command[6..];
            let count = usize::from(command[5]).min(data.len());
            self.memory[address..address + count].copy_from_slice(&data[..count]);
            self.status = OK_STATUS.to_vec();
        } else if command.len() >= 6 && &command[..3] == b"M-R" {
            let address = u16::from_le_bytes([command[3], command[4]]);
            // A count of zero reads a whole page.
            let count = match command[5] {
                0 => 0x100,
                n => usize::from(n),
            };
            let start = usize::from(address);
            let end = (start + count).min(self.memory.len());
            let quirk = self
                .quirks
                .iter()
                .map(|&q| usize::from(q))
                .find(|&q| start < q && q < end);
            self.outgoing.clear();
            match quirk {
                Some(q) => {
                    self.outgoing.extend(&self.memory[start..q]);
                    self.outgoing.push_back(b'\r');
                }
                None => {
                    self.outgoing.extend(&self.memory[start..end]);
                    self.outgoing.push_back(b'\r');
                }
            }
        } else if command.is_empty() {
        } else if command[0] == b'I' || command[0] == b'U' {
            self.status = OK_STATUS.to_vec();
        } else {
            self.status = SYNTAX_ERROR_STATUS.to_vec();
        }
    }
}

#[derive(Clone)]
pub struct Drive(Arc<Mutex<DriveState>>);

impl Drive {
    pub fn new() -> Drive {
        Drive(Arc::new(Mutex::new(DriveState::new())))
    }

    pub fn state(&self) -> MutexGuard<'_, DriveState> {
        self.0.lock().unwrap()
    }
}

/// A backend whose bus holds one drive at `DRIVE`.
pub struct SimBackend {
    drive: Drive,
    exports: Exports,
}

impl SimBackend {
    pub fn new(drive: Drive, exports: Exports) -> SimBackend {
        SimBackend { drive, exports }
    }

    fn state(&self) -> MutexGuard<'_, DriveState> {
        self.drive.state()
    }

    fn addressed(&self, device: u8) -> io::Result<()> {
        if device == DRIVE {
            Ok(())
        } else {
            Err(CbmError::BusError.into())
        }
    }
}

impl Backend for SimBackend {
    fn exports(&self) -> Exports {
        self.exports
    }

    fn driver_name(&mut self, port: Option<&str>) -> io::Result<String> {
        Ok(format!("simulated bus {}", port.unwrap_or("0")))
    }

    fn driver_open(&mut self, _port: Option<&str>) -> io::Result<()> {
        let mut state = self.state();
        if state.open_fails {
            return Err(CbmError::DeviceNotFound.into());
        }
        state.opened = true;
        Ok(())
    }

    fn driver_close(&mut self) {
        self.state().closed = true;
    }

    fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.listening.is_none() {
            return Ok(0);
        }
        state.events.push(Event::Write(data.to_vec()));
        state.received.extend_from_slice(data);
        Ok(data.len())
    }

    fn raw_read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.talking.is_none() {
            return Err(CbmError::BusError.into());
        }
        let n = buffer.len().min(state.outgoing.len());
        for (slot, byte) in buffer.iter_mut().zip(state.outgoing.drain(..n)) {
            *slot = byte;
        }
        state.eoi = state.outgoing.is_empty();
        Ok(n)
    }

    fn open(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.addressed(device)?;
        let mut state = self.state();
        state.events.push(Event::Open(device, secondary));
        state.listening = Some(secondary);
        state.received.clear();
        Ok(())
    }

    fn close(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.addressed(device)?;
        self.state().events.push(Event::Close(device, secondary));
        Ok(())
    }

    fn listen(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.addressed(device)?;
        let mut state = self.state();
        state.events.push(Event::Listen(device, secondary));
        state.listening = Some(secondary);
        state.talking = None;
        state.received.clear();
        Ok(())
    }

    fn talk(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.addressed(device)?;
        let mut state = self.state();
        state.events.push(Event::Talk(device, secondary));
        state.talking = Some(secondary);
        state.eoi = false;
        if secondary == 15 && state.outgoing.is_empty() {
            let status = std::mem::replace(&mut state.status, OK_STATUS.to_vec());
            state.outgoing.extend(status);
        }
        Ok(())
    }

    fn unlisten(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.events.push(Event::Unlisten);
        if state.listening.take() == Some(15) {
            state.execute();
        }
        Ok(())
    }

    fn untalk(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.events.push(Event::Untalk);
        state.talking = None;
        state.outgoing.clear();
        Ok(())
    }

    fn get_eoi(&mut self) -> io::Result<bool> {
        Ok(self.state().eoi)
    }

    fn clear_eoi(&mut self) -> io::Result<()> {
        self.state().eoi = false;
        Ok(())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.events.push(Event::Reset);
        state.status = POWER_ON_STATUS.to_vec();
        state.listening = None;
        state.talking = None;
        state.outgoing.clear();
        Ok(())
    }

    fn iec_poll(&mut self) -> io::Result<IecLines> {
        Ok(self.state().lines)
    }

    fn iec_setrelease(&mut self, set: IecLines, release: IecLines) -> io::Result<()> {
        let mut state = self.state();
        state.lines = (state.lines | set) - release;
        Ok(())
    }

    fn iec_wait(&mut self, line: IecLines, state: bool) -> io::Result<IecLines> {
        let lines = self.state().lines;
        if lines.contains(line) == state {
            Ok(lines)
        } else {
            Err(CbmError::Cancelled.into())
        }
    }

    fn init(&mut self) -> io::Result<()> {
        if self.state().init_fails {
            Err(io::Error::new(io::ErrorKind::Other, "init failed"))
        } else {
            Ok(())
        }
    }

    fn uninit(&mut self) {
        self.state().uninits += 1;
    }
}

/// A resolver that knows only the simulated backend, exporting `exports`.
pub fn resolver(drive: &Drive, exports: Exports) -> Resolver {
    let mut registry = Registry::empty();
    let drive = drive.clone();
    registry.register(NAME, move |_| {
        Box::new(SimBackend::new(drive.clone(), exports)) as Box<dyn Backend>
    });
    Resolver::new(registry, Config::default())
}

/// An open session on a fresh simulated drive.
pub fn session() -> (Session, Drive) {
    let drive = Drive::new();
    let session = Session::connect_with(
        &resolver(&drive, HOOKED),
        &AdapterSpec::named(NAME),
    )
    .unwrap();
    (session, drive)
}

pub fn error_of<T>(result: io::Result<T>) -> Option<CbmError> {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(e) => CbmError::from_io_error(&e),
    }
}
