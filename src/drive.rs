//! Conveniences built on the command channel (secondary address 15) that
//! every CBM drive provides.

use std::fmt;
use std::io;

use log::{debug, warn};

use crate::bus::Session;
use crate::error::CbmError;
use crate::util::atoi;

/// The command and error channel.
pub const COMMAND_CHANNEL: u8 = 15;

/// The status reported when the drive cannot be reached.
pub const DRIVER_ERROR_STATUS: &str = "99, DRIVER ERROR,00,00\r";

const STATUS_LENGTH: usize = 64;

/// A drive's reply on the error channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveStatus {
    /// The leading error number, such as 0 for `00, OK,00,00`.
    pub code: i32,
    /// The full status line, including its trailing CR.
    pub text: String,
}

impl DriveStatus {
    fn driver_error() -> DriveStatus {
        DriveStatus::from_text(DRIVER_ERROR_STATUS)
    }

    fn from_text(text: &str) -> DriveStatus {
        DriveStatus {
            code: atoi(text.as_bytes()),
            text: text.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code < 20
    }
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.text.trim_end_matches('\r'))
    }
}

/// Read the status line of `device`.  Bus failures produce the
/// `99, DRIVER ERROR` status rather than an error.
pub fn device_status(session: &mut Session, device: u8) -> DriveStatus {
    if let Err(e) = session.talk(device, COMMAND_CHANNEL) {
        warn!("device {} did not talk: {}", device, e);
        return DriveStatus::driver_error();
    }
    let mut buffer = [0u8; STATUS_LENGTH];
    let status = match session.raw_read(&mut buffer) {
        Ok(n) => DriveStatus::from_text(&String::from_utf8_lossy(&buffer[..n])),
        Err(e) => {
            warn!("reading status of device {} failed: {}", device, e);
            DriveStatus::driver_error()
        }
    };
    if let Err(e) = session.untalk() {
        warn!("untalk after status read failed: {}", e);
    }
    debug!("device {} status: {}", device, status);
    status
}

/// Send `command` to the command channel of `device`.
pub fn exec_command(session: &mut Session, device: u8, command: &[u8]) -> io::Result<()> {
    session.listen(device, COMMAND_CHANNEL)?;
    let written = session.raw_write(command);
    session.unlisten()?;
    if written? != command.len() {
        warn!("device {} took only part of a command", device);
        return Err(CbmError::BusError.into());
    }
    Ok(())
}

/// Drive families distinguished by `identify`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Unknown,
    Cbm1541,
    Cbm1570,
    Cbm1571,
    Cbm1581,
    Cbm3040,
    Cbm4040,
    Cbm8050,
    Cbm8250,
}

/// The result of fingerprinting a drive's ROM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub device_type: DeviceType,
    pub description: String,
    /// The two ROM bytes the identification is based on.
    pub footprint: u16,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Where the footprint is read from.
const FOOTPRINT_ADDRESS: u16 = 0xFF40;
/// The 1540 and 1541 share a footprint; the IRQ vector tells them apart
/// from their speeder variants.
const IRQ_VECTOR_ADDRESS: u16 = 0xFFFE;
const PLAIN_1541_IRQ_VECTOR: u16 = 0xFE67;

fn lookup(footprint: u16) -> Option<(DeviceType, &'static str)> {
    use self::DeviceType::*;
    Some(match footprint {
        0xaaaa => (Cbm1541, "1540 or 1541"),
        0xf00f => (Cbm1541, "1541-II"),
        0xcd18 => (Cbm1541, "1541C"),
        0x10ca => (Cbm1541, "DolphinDOS 1541"),
        0x6f10 => (Cbm1541, "SpeedDOS 1541"),
        0x2710 => (Cbm1541, "ProfessionalDOS 1541"),
        0x8085 => (Cbm1541, "JiffyDOS 1541"),
        0xaeea => (Cbm1541, "64'er DOS 1541"),
        0xfed7 => (Cbm1570, "1570"),
        0x02ac => (Cbm1571, "1571"),
        0x01ba => (Cbm1581, "1581"),
        0x32f0 => (Cbm3040, "3040"),
        0xc320 | 0x20f8 => (Cbm4040, "4040"),
        0xf2e9 => (Cbm8050, "8050 dos2.5"),
        0xc866 | 0xc611 => (Cbm8250, "8250 dos2.7"),
        _ => return None,
    })
}

/// Spell an unknown footprint with one letter per nibble, `@` for zero.
fn footprint_letters(footprint: u16) -> String {
    (0..4)
        .rev()
        .map(|shift| char::from(0x40 | (footprint >> (shift * 4) & 0x0F) as u8))
        .collect()
}

/// Read two bytes of ROM through the command channel.  The drive appends
/// a CR, so three bytes must arrive.
fn read_rom_word(session: &mut Session, device: u8, address: u16) -> io::Result<Option<u16>> {
    let [low, high] = address.to_le_bytes();
    exec_command(session, device, &[b'M', b'-', b'R', low, high, 2])?;
    session.talk(device, COMMAND_CHANNEL)?;
    let mut buffer = [0u8; 3];
    let read = session.raw_read(&mut buffer);
    session.untalk()?;
    Ok(match read? {
        3 => Some(u16::from_le_bytes([buffer[0], buffer[1]])),
        n => {
            debug!("ROM read at {:#06x} returned {} bytes", address, n);
            None
        }
    })
}

/// Identify the drive at `device` from a fingerprint in its ROM.  Unknown
/// drives are not an error; they are reported as `*unknown*`.
pub fn identify(session: &mut Session, device: u8) -> io::Result<Identity> {
    let mut footprint = match read_rom_word(session, device, FOOTPRINT_ADDRESS)? {
        Some(footprint) => footprint,
        None => return Err(CbmError::BusError.into()),
    };
    if footprint == 0xaaaa {
        match read_rom_word(session, device, IRQ_VECTOR_ADDRESS) {
            Ok(Some(vector)) if vector != PLAIN_1541_IRQ_VECTOR => footprint = vector,
            Ok(_) => {}
            Err(e) => debug!("IRQ vector read failed: {}", e),
        }
    }

    let identity = match lookup(footprint) {
        Some((device_type, description)) => Identity {
            device_type,
            description: description.to_string(),
            footprint,
        },
        None => Identity {
            device_type: DeviceType::Unknown,
            description: format!("*unknown*, footprint=<{}>", footprint_letters(footprint)),
            footprint,
        },
    };
    debug!("device {} is {} ({:#06x})", device, identity, footprint);
    Ok(identity)
}
