use std::io;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use rusb::{Direction, Recipient, RequestType};

use super::protocol::*;
use super::transport::{UsbHost, UsbLink};
use crate::backend::{Canceller, ExtendedTransfer};
use crate::error::CbmError;
use crate::hex;
use crate::util::atoi;

/// No host-side timeout for bulk transfers.
const NO_TIMEOUT: Duration = Duration::ZERO;

/// How status waits are bounded and interrupted.
#[derive(Clone, Debug, Default)]
pub struct WaitPolicy {
    /// Timeout of each status read; `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
    /// Checked before every status read.
    pub cancel: Canceller,
}

/// The device chosen by a bus scan.
pub struct Selection {
    pub link: Box<dyn UsbLink>,
    pub serial: u32,
    pub location: String,
}

/// Interpret a USB serial number string.  Only one to three characters
/// are considered; anything else counts as serial zero.
fn parse_serial(serial: &str) -> u32 {
    match serial.len() {
        1..=3 => atoi(serial.as_bytes()).max(0) as u32,
        _ => 0,
    }
}

/// Scan every bus for an xum1541.  An adapter whose serial number equals
/// `port` wins; otherwise the adapter with the lowest serial is used.
pub fn enumerate(host: &dyn UsbHost, port: u32) -> io::Result<Selection> {
    let port = if port > MAX_SERIAL { 0 } else { port };
    debug!("scanning USB for xum1541 with serial {}", port);

    let candidates = host.candidates().map_err(|e| {
        error!("USB scan failed: {}", e);
        CbmError::from(e).to_io_error()
    })?;

    let mut fallback: Option<(u32, usize)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.vendor_id() != VENDOR_ID || candidate.product_id() != PRODUCT_ID {
            continue;
        }
        let location = candidate.location();
        debug!("found xu/xum1541 at {}", location);

        let mut link = match candidate.open() {
            Ok(link) => link,
            Err(e) => {
                warn!("cannot open USB device at {}: {}", location, e);
                continue;
            }
        };

        match link.product() {
            Ok(ref product) if product.contains(PRODUCT_NAME) => {
                debug!("xum1541 name: {}", product);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("cannot query product name at {}: {}", location, e);
                continue;
            }
        }

        let serial = match link.serial_number() {
            Ok(serial) => parse_serial(&serial),
            Err(e) if port != 0 => {
                warn!("cannot query serial number at {}: {}", location, e);
                continue;
            }
            Err(_) => 0,
        };

        if serial != port {
            if fallback.map_or(true, |(least, _)| serial < least) {
                fallback = Some((serial, index));
            }
            continue;
        }

        info!("using xum1541 serial {} at {}", serial, location);
        return Ok(Selection {
            link,
            serial,
            location,
        });
    }

    if let Some((serial, index)) = fallback {
        let candidate = &candidates[index];
        let location = candidate.location();
        match candidate.open() {
            Ok(link) => {
                info!("using default xum1541 serial {} at {}", serial, location);
                return Ok(Selection {
                    link,
                    serial,
                    location,
                });
            }
            Err(e) => warn!("cannot reopen USB device at {}: {}", location, e),
        }
    }

    warn!("no xum1541 device found");
    Err(CbmError::DeviceNotFound.into())
}

fn class_request(direction: Direction) -> u8 {
    rusb::request_type(direction, RequestType::Class, Recipient::Device)
}

/// An open, claimed xum1541.  Dropping it shuts the adapter down and
/// releases its interface.
pub struct Xum1541 {
    link: Box<dyn UsbLink>,
    serial: u32,
    location: String,
    mode: DriveMode,
    firmware: u8,
    capabilities: Capabilities,
    claimed: bool,
    /// Set by a transport failure that left the command framing unknown.
    poisoned: bool,
    /// A command was sent whose status has not been collected.
    pending: bool,
    wait: WaitPolicy,
}

impl Xum1541 {
    /// Find, claim, and initialize an adapter.
    pub fn open(host: &dyn UsbHost, port: u32, wait: WaitPolicy) -> io::Result<Xum1541> {
        let selection = enumerate(host, port)?;
        let mut device = Xum1541 {
            link: selection.link,
            serial: selection.serial,
            location: selection.location,
            mode: DriveMode::Uninitialized,
            firmware: 0,
            capabilities: Capabilities::empty(),
            claimed: false,
            poisoned: false,
            pending: false,
            wait,
        };
        device.initialize()?;
        Ok(device)
    }

    fn initialize(&mut self) -> io::Result<()> {
        if let Err(e) = self.link.set_configuration(CONFIGURATION) {
            warn!("cannot select configuration: {}", e);
            return Err(CbmError::ClaimFailed.into());
        }
        if let Err(e) = self.link.claim_interface(INTERFACE) {
            warn!("cannot claim interface: {}", e);
            return Err(CbmError::ClaimFailed.into());
        }
        self.claimed = true;

        let mut info = [0u8; DEVINFO_SIZE];
        let len = self
            .link
            .read_control(
                class_request(Direction::In),
                ControlRequest::Init as u8,
                0,
                0,
                &mut info,
                USB_TIMEOUT,
            )
            .map_err(|e| CbmError::from(e).to_io_error())?;
        if len < 2 {
            warn!("device info request returned {} bytes", len);
            return Err(CbmError::UsbIo("short device info".to_string()).into());
        }

        self.firmware = info[0];
        debug!("firmware version {}, library version {}", info[0], VERSION);
        if self.firmware != VERSION {
            if self.firmware < VERSION {
                warn!("xum1541 firmware too old ({} < {}), please update it", info[0], VERSION);
            } else {
                warn!("xum1541 firmware too new ({} > {}), please update this library", info[0], VERSION);
            }
            return Err(CbmError::VersionMismatch {
                found: info[0],
                expected: VERSION,
            }
            .into());
        }

        self.capabilities = Capabilities::from_bits_truncate(info[1]);
        let status = AdapterStatus::from_bits_truncate(info[2]);
        debug!("capabilities {:?}, status {:?}", self.capabilities, status);

        if status.contains(AdapterStatus::DOING_RESET) {
            warn!("previous command was interrupted, resetting");
            self.clear_halts()?;
        }

        self.mode = DriveMode::from_device_info(self.capabilities, status);
        debug!("entered {:?} mode", self.mode);
        Ok(())
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn firmware_version(&self) -> u8 {
        self.firmware
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn canceller(&self) -> Canceller {
        self.wait.cancel.clone()
    }

    fn usable(&self) -> io::Result<()> {
        if self.poisoned {
            Err(CbmError::UsbIo("adapter state unknown, reopen it".to_string()).into())
        } else {
            Ok(())
        }
    }

    /// Refuse a new command while an abandoned one still owes its status;
    /// `reset` flushes it.
    fn idle(&self) -> io::Result<()> {
        self.usable()?;
        if self.pending {
            warn!("previous command was abandoned, reset the bus first");
            return Err(CbmError::Cancelled.into());
        }
        Ok(())
    }

    /// Record a failure after which the bulk framing cannot be trusted.
    fn fatal(&mut self, context: &str, detail: String) -> io::Error {
        error!("USB error in {}: {}", context, detail);
        self.poisoned = true;
        CbmError::UsbIo(format!("{}: {}", context, detail)).into()
    }

    fn clear_halts(&mut self) -> io::Result<()> {
        for endpoint in [BULK_IN_ENDPOINT, BULK_OUT_ENDPOINT] {
            if let Err(e) = self.link.clear_halt(endpoint) {
                warn!("clear halt failed for endpoint {:#04x}: {}", endpoint, e);
                return Err(CbmError::from(e).into());
            }
        }
        Ok(())
    }

    /// Send a request without data on the control endpoint.
    pub fn control(&mut self, request: ControlRequest) -> io::Result<usize> {
        self.usable()?;
        debug!("control request {:?}", request);
        match self.link.write_control(
            class_request(Direction::Out),
            request as u8,
            0,
            0,
            &[],
            USB_TIMEOUT,
        ) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fatal("control request", e.to_string())),
        }
    }

    /// Read status blocks until the adapter is no longer busy.  Returns the
    /// extended status of a Ready block.
    fn wait_status(&mut self) -> io::Result<u16> {
        self.pending = true;
        let timeout = self.wait.attempt_timeout.unwrap_or(NO_TIMEOUT);
        loop {
            if self.wait.cancel.take() {
                warn!("status wait cancelled");
                return Err(CbmError::Cancelled.into());
            }
            let mut block = [0u8; STATUS_SIZE];
            let n = match self.link.read_bulk(BULK_IN_ENDPOINT, &mut block, timeout) {
                Ok(n) => n,
                Err(e) => return Err(self.fatal("status wait", e.to_string())),
            };
            if n != STATUS_SIZE {
                return Err(self.fatal("status wait", format!("{} byte status block", n)));
            }
            match parse_status(&block) {
                (Some(IoStatus::Busy), _) => trace!("adapter busy, waiting"),
                (Some(IoStatus::Ready), value) => {
                    self.pending = false;
                    trace!("status ready, value {:#06x}", value);
                    return Ok(value);
                }
                (Some(IoStatus::Error), _) => {
                    self.pending = false;
                    warn!("adapter reports error");
                    return Err(CbmError::DeviceError.into());
                }
                (None, _) => {
                    let detail = format!("unknown status value {}", block[0]);
                    return Err(self.fatal("status wait", detail));
                }
            }
        }
    }

    /// Run a simple command and return its extended status.
    pub fn ioctl(&mut self, opcode: Opcode, addr: u8, secondary: u8) -> io::Result<u16> {
        self.mode.check(opcode.kind())?;
        self.idle()?;
        let frame = command_frame(opcode, addr, secondary);
        debug!("ioctl {:?} for device {}, sub {}", opcode, addr, secondary);
        trace!("command frame {}", hex(&frame));
        if let Err(e) = self.link.write_bulk(BULK_OUT_ENDPOINT, &frame, NO_TIMEOUT) {
            return Err(self.fatal("ioctl command", e.to_string()));
        }
        self.wait_status()
    }

    /// Stream `data` to the adapter.  Returns the number of bytes accepted;
    /// for the standard bus protocol this is the count the firmware reports.
    ///
    /// The header carries a 16-bit length, so at most 0xFFFF bytes go in one
    /// call.  A USB failure poisons the handle, except for the deliberate
    /// stall of a tape transfer, which ends it with the partial count.
    pub fn write(&mut self, protocol: Protocol, flags: WriteFlags, data: &[u8]) -> io::Result<usize> {
        let kind = protocol.kind();
        self.mode.check(kind)?;
        self.idle()?;
        let length = u16::try_from(data.len()).map_err(|_| CbmError::InvalidArgument.to_io_error())?;

        let header = transfer_header(Opcode::Write, mode_byte(protocol, flags), length);
        debug!("write {:?} {} bytes, flags {:?}", protocol, data.len(), flags);
        trace!("write header {}", hex(&header));
        if let Err(e) = self.link.write_bulk(BULK_OUT_ENDPOINT, &header, NO_TIMEOUT) {
            return Err(self.fatal("write command", e.to_string()));
        }

        let mut written = 0;
        for chunk in data.chunks(MAX_TRANSFER) {
            match self.link.write_bulk(BULK_OUT_ENDPOINT, chunk, NO_TIMEOUT) {
                Ok(n) => {
                    written += n;
                    if n < chunk.len() {
                        debug!("short write of {} bytes ends the transfer", n);
                        break;
                    }
                }
                Err(e) if kind == CommandKind::Tape => {
                    warn!("tape stalled the transfer after {} bytes: {}", written, e);
                    self.recover_out_endpoint();
                    return Ok(written);
                }
                Err(e) => return Err(self.fatal("write data", e.to_string())),
            }
        }

        if protocol == Protocol::Cbm {
            written = usize::from(self.wait_status()?);
        }
        trace!("write done, {} bytes", written);
        Ok(written)
    }

    /// Tape hardware stalls the OUT endpoint on purpose; clear it so the
    /// next transfer can run.
    fn recover_out_endpoint(&mut self) {
        if let Err(e) = self.link.clear_halt(BULK_OUT_ENDPOINT) {
            warn!("clear halt on OUT endpoint failed after tape stall: {}", e);
        }
        let request_type = rusb::request_type(Direction::Out, RequestType::Standard, Recipient::Endpoint);
        const CLEAR_FEATURE: u8 = 0x01;
        const ENDPOINT_HALT: u16 = 0;
        if let Err(e) = self.link.write_control(
            request_type,
            CLEAR_FEATURE,
            ENDPOINT_HALT,
            u16::from(BULK_OUT_ENDPOINT),
            &[],
            USB_TIMEOUT,
        ) {
            warn!("CLEAR_FEATURE after tape stall failed: {}", e);
        }
    }

    /// Read up to `buffer.len()` bytes.  `length_flags` is OR-ed into the
    /// length field of the header.  USB failures poison the handle.
    pub fn read(&mut self, protocol: Protocol, buffer: &mut [u8], length_flags: u16) -> io::Result<usize> {
        self.mode.check(protocol.kind())?;
        self.idle()?;
        let length = u16::try_from(buffer.len())
            .ok()
            .filter(|length| length & length_flags == 0)
            .ok_or_else(|| CbmError::InvalidArgument.to_io_error())?;

        let header = transfer_header(Opcode::Read, protocol as u8, length | length_flags);
        debug!("read {:?} {} bytes", protocol, buffer.len());
        trace!("read header {}", hex(&header));
        if let Err(e) = self.link.write_bulk(BULK_OUT_ENDPOINT, &header, NO_TIMEOUT) {
            return Err(self.fatal("read command", e.to_string()));
        }

        let mut read = 0;
        for chunk in buffer.chunks_mut(MAX_TRANSFER) {
            let n = match self.link.read_bulk(BULK_IN_ENDPOINT, chunk, NO_TIMEOUT) {
                Ok(n) => n,
                Err(e) => return Err(self.fatal("read data", e.to_string())),
            };
            read += n;
            if n < chunk.len() {
                debug!("short read of {} bytes ends the transfer", n);
                break;
            }
        }
        trace!("read done, {} bytes", read);
        Ok(read)
    }

    /// Write, then collect the firmware's completion status.
    pub fn write_ext(&mut self, protocol: Protocol, data: &[u8]) -> io::Result<ExtendedTransfer> {
        let bytes = self.write(protocol, WriteFlags::empty(), data)?;
        let status = self.wait_status()?;
        Ok(ExtendedTransfer { status, bytes })
    }

    /// Read, then collect the firmware's completion status.
    pub fn read_ext(&mut self, protocol: Protocol, buffer: &mut [u8]) -> io::Result<ExtendedTransfer> {
        let bytes = self.read(protocol, buffer, 0)?;
        let status = self.wait_status()?;
        Ok(ExtendedTransfer { status, bytes })
    }

    /// Ask the firmware to abandon a running tape operation.
    pub fn tap_break(&mut self) -> io::Result<()> {
        self.mode.check(CommandKind::Tape)?;
        debug!("sending tape break");
        self.control(ControlRequest::TapBreak).map(|_| ())
    }

    /// Reset the bus.  A command abandoned by a cancelled wait is flushed
    /// from both endpoints first.
    pub fn reset(&mut self) -> io::Result<()> {
        self.usable()?;
        self.wait.cancel.take();
        if self.pending {
            warn!("flushing unfinished command before reset");
            self.clear_halts()?;
            self.pending = false;
        }
        self.control(ControlRequest::Reset).map(|_| ())
    }

    fn shutdown(&mut self) {
        if !self.claimed {
            return;
        }
        debug!("closing USB link to {}", self.location);
        if let Err(e) = self.link.write_control(
            class_request(Direction::Out),
            ControlRequest::Shutdown as u8,
            0,
            0,
            &[],
            SHUTDOWN_TIMEOUT,
        ) {
            warn!("shutdown request failed, continuing: {}", e);
        }
        if let Err(e) = self.link.release_interface(INTERFACE) {
            warn!("releasing interface failed: {}", e);
        }
        self.claimed = false;
        self.mode = DriveMode::Uninitialized;
    }
}

impl Drop for Xum1541 {
    fn drop(&mut self) {
        self.shutdown();
    }
}
