//! Wire-level constants of the xum1541 firmware interface.

use std::time::Duration;

use bitflags::bitflags;

use crate::error::CbmError;

pub const VENDOR_ID: u16 = 0x16d0;
pub const PRODUCT_ID: u16 = 0x0504;
/// Substring the USB product string must contain.
pub const PRODUCT_NAME: &str = "xum1541";
/// The only firmware protocol version this backend speaks.
pub const VERSION: u8 = 7;
pub const MAX_SERIAL: u32 = 255;

pub const CONFIGURATION: u8 = 1;
pub const INTERFACE: u8 = 0;
pub const BULK_IN_ENDPOINT: u8 = 3 | 0x80;
pub const BULK_OUT_ENDPOINT: u8 = 4;

pub const COMMAND_SIZE: usize = 4;
pub const STATUS_SIZE: usize = 3;
pub const DEVINFO_SIZE: usize = 8;
pub const MAX_TRANSFER: usize = 32768;

/// The firmware gives up on the bus after this long.
pub const FIRMWARE_TIMEOUT: Duration = Duration::from_millis(1500);
/// Host-side timeout for control requests, a little beyond the firmware's.
pub const USB_TIMEOUT: Duration = Duration::from_millis(1650);
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Length flag asking the firmware to end a nibbler track read early.
pub const NIB_READ_VAR: u16 = 0x8000;

/// Requests on the control endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlRequest {
    Echo = 0,
    Init = 1,
    Reset = 2,
    Shutdown = 3,
    EnterBootloader = 4,
    TapBreak = 5,
}

/// First byte of a bulk command frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Read = 8,
    Write = 9,
    GetEoi = 23,
    ClearEoi = 24,
    PpRead = 25,
    PpWrite = 26,
    IecPoll = 27,
    IecWait = 28,
    IecSetRelease = 29,
    ParburstRead = 30,
    ParburstWrite = 31,
    SrqburstRead = 32,
    SrqburstWrite = 33,
    TapMotorOn = 66,
    TapGetVer = 67,
    TapPrepareCapture = 68,
    TapPrepareWrite = 69,
    TapGetSense = 70,
    TapWaitForStopSense = 71,
    TapWaitForPlaySense = 72,
    TapMotorOff = 73,
}

impl Opcode {
    pub fn kind(self) -> CommandKind {
        match self as u8 {
            66..=73 => CommandKind::Tape,
            _ => CommandKind::Disk,
        }
    }
}

/// Transfer protocol, sent in the upper nibble of the mode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Cbm = 0x10,
    S1 = 0x20,
    S2 = 0x30,
    Pp = 0x40,
    P2 = 0x50,
    Nib = 0x60,
    NibCommand = 0x70,
    NibSrq = 0x80,
    NibSrqCommand = 0x90,
    Tap = 0xA0,
    TapConfig = 0xB0,
}

impl Protocol {
    pub fn kind(self) -> CommandKind {
        match self {
            Protocol::Tap | Protocol::TapConfig => CommandKind::Tape,
            _ => CommandKind::Disk,
        }
    }
}

bitflags! {
    /// Flags in the lower nibble of the mode byte of a write.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct WriteFlags: u8 {
        const TALK = 0x01;
        const ATN = 0x02;
    }
}

/// Build the mode byte for a transfer.
pub fn mode_byte(protocol: Protocol, flags: WriteFlags) -> u8 {
    protocol as u8 | flags.bits()
}

bitflags! {
    /// Features the firmware was built with.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const CBM = 0x01;
        const NIB = 0x02;
        const NIB_SRQ = 0x04;
        const IEEE488 = 0x08;
        const TAP = 0x10;
    }
}

bitflags! {
    /// Adapter state reported at initialization.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AdapterStatus: u8 {
        const DOING_RESET = 0x01;
        const NO_DEVICE = 0x02;
        const IEEE488_PRESENT = 0x10;
        const TAPE_PRESENT = 0x20;
    }
}

/// First byte of a status block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    Busy,
    Ready,
    Error,
}

impl IoStatus {
    pub fn from_byte(byte: u8) -> Option<IoStatus> {
        match byte {
            1 => Some(IoStatus::Busy),
            2 => Some(IoStatus::Ready),
            3 => Some(IoStatus::Error),
            _ => None,
        }
    }
}

/// Decode a status block into its code and extended value.
pub fn parse_status(block: &[u8; STATUS_SIZE]) -> (Option<IoStatus>, u16) {
    (
        IoStatus::from_byte(block[0]),
        u16::from_le_bytes([block[1], block[2]]),
    )
}

/// Whether a command drives the disk side or the tape side of the adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Disk,
    Tape,
}

/// The adapter's operating mode, latched at initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveMode {
    Uninitialized,
    Disk,
    Tape,
    TapeUnsupported,
}

impl DriveMode {
    /// Derive the mode from the INIT response.
    pub fn from_device_info(capabilities: Capabilities, status: AdapterStatus) -> DriveMode {
        if !capabilities.contains(Capabilities::TAP) {
            DriveMode::TapeUnsupported
        } else if status.contains(AdapterStatus::TAPE_PRESENT) {
            DriveMode::Tape
        } else {
            DriveMode::Disk
        }
    }

    /// Refuse commands that would mix disk and tape traffic.
    pub fn check(self, kind: CommandKind) -> Result<(), CbmError> {
        match (self, kind) {
            (DriveMode::Uninitialized, _) => Err(CbmError::NoDiskTapeMode),
            (DriveMode::TapeUnsupported, CommandKind::Tape) => Err(CbmError::NoTapeSupport),
            (DriveMode::Disk, CommandKind::Tape) => Err(CbmError::TapeCmdInDiskMode),
            (DriveMode::Tape, CommandKind::Disk) => Err(CbmError::DiskCmdInTapeMode),
            _ => Ok(()),
        }
    }
}

/// Build a 4-byte command frame.
pub fn command_frame(opcode: Opcode, addr: u8, secondary: u8) -> [u8; COMMAND_SIZE] {
    [opcode as u8, addr, secondary, 0]
}

/// Build the header that precedes a streamed transfer.
pub fn transfer_header(opcode: Opcode, mode: u8, length: u16) -> [u8; COMMAND_SIZE] {
    let [low, high] = length.to_le_bytes();
    [opcode as u8, mode, low, high]
}
