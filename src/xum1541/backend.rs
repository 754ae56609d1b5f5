use std::io;

use log::{debug, warn};

use super::device::{enumerate, WaitPolicy, Xum1541};
use super::protocol::*;
use super::transport::{RusbHost, UsbHost};
use crate::backend::{
    Backend, Canceller, Exports, ExtendedTransfer, IecLines, ParallelBurst, ParallelPort, SrqBurst,
    Tape,
};
use crate::config::AdapterConfig;
use crate::error::CbmError;
use crate::util::port_number;

/// The xum1541 as a bus backend.  The USB device is opened by
/// `driver_open` and released by `driver_close` or drop.
pub struct Xum1541Backend {
    host: Box<dyn UsbHost>,
    wait: WaitPolicy,
    device: Option<Xum1541>,
}

impl Xum1541Backend {
    pub fn new(settings: &AdapterConfig) -> Xum1541Backend {
        Xum1541Backend::with_host(Box::new(RusbHost), settings)
    }

    /// Use `host` instead of the system USB stack.
    pub fn with_host(host: Box<dyn UsbHost>, settings: &AdapterConfig) -> Xum1541Backend {
        Xum1541Backend {
            host,
            wait: WaitPolicy {
                attempt_timeout: settings.status_timeout(),
                cancel: Canceller::new(),
            },
            device: None,
        }
    }

    /// The open device, if any.
    pub fn device(&mut self) -> Option<&mut Xum1541> {
        self.device.as_mut()
    }

    fn handle(&mut self) -> io::Result<&mut Xum1541> {
        self.device
            .as_mut()
            .ok_or_else(|| CbmError::NoBackend.to_io_error())
    }

    /// Send a command byte sequence under ATN.  The device must answer,
    /// otherwise the bus is in error.
    fn bus_command(&mut self, bytes: &[u8], flags: WriteFlags) -> io::Result<()> {
        debug!("bus command {}", crate::hex(bytes));
        match self.handle()?.write(Protocol::Cbm, flags | WriteFlags::ATN, bytes) {
            Ok(0) => Err(CbmError::BusError.into()),
            Ok(_) => Ok(()),
            Err(ref e) if CbmError::from_io_error(e) == Some(CbmError::DeviceError) => {
                Err(CbmError::BusError.into())
            }
            Err(e) => Err(e),
        }
    }

    fn lines(&mut self, opcode: Opcode, addr: u8, secondary: u8) -> io::Result<IecLines> {
        let value = self.handle()?.ioctl(opcode, addr, secondary)?;
        Ok(IecLines::from_bits_truncate(value as u8))
    }

    fn tape_status(&mut self, opcode: Opcode) -> io::Result<u16> {
        self.handle()?.ioctl(opcode, 0, 0)
    }
}

/// Address with the device number in the low five bits.
fn address(command: u8, device: u8) -> u8 {
    command | (device & 0x1F)
}

/// Secondary address with the channel in the low four bits.
fn secondary_address(command: u8, secondary: u8) -> u8 {
    command | (secondary & 0x0F)
}

impl Backend for Xum1541Backend {
    fn exports(&self) -> Exports {
        Exports::MANDATORY
            | Exports::IEC_SET
            | Exports::IEC_RELEASE
            | Exports::PARALLEL_BURST
            | Exports::PARALLEL_PORT
            | Exports::SRQ_BURST
            | Exports::TAPE
    }

    fn driver_name(&mut self, port: Option<&str>) -> io::Result<String> {
        let selection = enumerate(self.host.as_ref(), port_number(port, MAX_SERIAL))?;
        Ok(format!(
            "xum1541 serial {} at {}",
            selection.serial, selection.location
        ))
    }

    fn driver_open(&mut self, port: Option<&str>) -> io::Result<()> {
        if self.device.is_some() {
            warn!("xum1541 already open, reopening");
            self.device = None;
        }
        let port = port_number(port, MAX_SERIAL);
        let device = Xum1541::open(self.host.as_ref(), port, self.wait.clone())?;
        self.device = Some(device);
        Ok(())
    }

    fn driver_close(&mut self) {
        self.device = None;
    }

    fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.handle()?.write(Protocol::Cbm, WriteFlags::empty(), data)
    }

    fn raw_read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(Protocol::Cbm, buffer, 0)
    }

    fn open(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.bus_command(
            &[address(0x20, device), secondary_address(0xF0, secondary)],
            WriteFlags::empty(),
        )
    }

    fn close(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.bus_command(
            &[address(0x20, device), secondary_address(0xE0, secondary)],
            WriteFlags::empty(),
        )
    }

    fn listen(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.bus_command(
            &[address(0x20, device), secondary_address(0x60, secondary)],
            WriteFlags::empty(),
        )
    }

    fn talk(&mut self, device: u8, secondary: u8) -> io::Result<()> {
        self.bus_command(
            &[address(0x40, device), secondary_address(0x60, secondary)],
            WriteFlags::TALK,
        )
    }

    fn unlisten(&mut self) -> io::Result<()> {
        self.bus_command(&[0x3F], WriteFlags::empty())
    }

    fn untalk(&mut self) -> io::Result<()> {
        self.bus_command(&[0x5F], WriteFlags::empty())
    }

    fn get_eoi(&mut self) -> io::Result<bool> {
        Ok(self.handle()?.ioctl(Opcode::GetEoi, 0, 0)? != 0)
    }

    fn clear_eoi(&mut self) -> io::Result<()> {
        self.handle()?.ioctl(Opcode::ClearEoi, 0, 0).map(|_| ())
    }

    fn reset(&mut self) -> io::Result<()> {
        self.handle()?.reset()
    }

    fn iec_poll(&mut self) -> io::Result<IecLines> {
        self.lines(Opcode::IecPoll, 0, 0)
    }

    fn iec_setrelease(&mut self, set: IecLines, release: IecLines) -> io::Result<()> {
        self.lines(Opcode::IecSetRelease, set.bits(), release.bits())
            .map(|_| ())
    }

    fn iec_wait(&mut self, line: IecLines, state: bool) -> io::Result<IecLines> {
        self.lines(Opcode::IecWait, line.bits(), u8::from(state))
    }

    fn iec_set(&mut self, line: IecLines) -> io::Result<()> {
        self.iec_setrelease(line, IecLines::empty())
    }

    fn iec_release(&mut self, line: IecLines) -> io::Result<()> {
        self.iec_setrelease(IecLines::empty(), line)
    }

    fn canceller(&self) -> Option<Canceller> {
        Some(self.wait.cancel.clone())
    }

    fn parallel_burst(&mut self) -> Option<&mut dyn ParallelBurst> {
        Some(self)
    }

    fn parallel_port(&mut self) -> Option<&mut dyn ParallelPort> {
        Some(self)
    }

    fn srq_burst(&mut self) -> Option<&mut dyn SrqBurst> {
        Some(self)
    }

    fn tape(&mut self) -> Option<&mut dyn Tape> {
        Some(self)
    }
}

impl ParallelBurst for Xum1541Backend {
    fn read(&mut self) -> io::Result<u8> {
        Ok(self.handle()?.ioctl(Opcode::ParburstRead, 0, 0)? as u8)
    }

    fn write(&mut self, value: u8) -> io::Result<()> {
        self.handle()?
            .ioctl(Opcode::ParburstWrite, value, 0)
            .map(|_| ())
    }

    fn read_track(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let n = self.handle()?.read(Protocol::Nib, buffer, 0)?;
        if n != buffer.len() {
            warn!("parallel track read returned {} of {} bytes", n, buffer.len());
        }
        Ok(n)
    }

    fn write_track(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self
            .handle()?
            .write(Protocol::Nib, WriteFlags::empty(), data)?;
        if n != data.len() {
            warn!("parallel track write took {} of {} bytes", n, data.len());
        }
        Ok(n)
    }

    fn read_n(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(Protocol::NibCommand, buffer, 0)
    }

    fn write_n(&mut self, data: &[u8]) -> io::Result<usize> {
        self.handle()?
            .write(Protocol::NibCommand, WriteFlags::empty(), data)
    }

    fn read_track_var(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(Protocol::Nib, buffer, NIB_READ_VAR)
    }
}

impl ParallelPort for Xum1541Backend {
    fn pp_read(&mut self) -> io::Result<u8> {
        Ok(self.handle()?.ioctl(Opcode::PpRead, 0, 0)? as u8)
    }

    fn pp_write(&mut self, value: u8) -> io::Result<()> {
        self.handle()?.ioctl(Opcode::PpWrite, value, 0).map(|_| ())
    }
}

impl SrqBurst for Xum1541Backend {
    fn read(&mut self) -> io::Result<u8> {
        Ok(self.handle()?.ioctl(Opcode::SrqburstRead, 0, 0)? as u8)
    }

    fn write(&mut self, value: u8) -> io::Result<()> {
        self.handle()?
            .ioctl(Opcode::SrqburstWrite, value, 0)
            .map(|_| ())
    }

    fn read_track(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(Protocol::NibSrq, buffer, 0)
    }

    fn write_track(&mut self, data: &[u8]) -> io::Result<usize> {
        self.handle()?
            .write(Protocol::NibSrq, WriteFlags::empty(), data)
    }

    fn read_n(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(Protocol::NibSrqCommand, buffer, 0)
    }

    fn write_n(&mut self, data: &[u8]) -> io::Result<usize> {
        self.handle()?
            .write(Protocol::NibSrqCommand, WriteFlags::empty(), data)
    }
}

impl Tape for Xum1541Backend {
    fn prepare_capture(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapPrepareCapture)
    }

    fn prepare_write(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapPrepareWrite)
    }

    fn get_sense(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapGetSense)
    }

    fn wait_for_stop_sense(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapWaitForStopSense)
    }

    fn wait_for_play_sense(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapWaitForPlaySense)
    }

    fn motor_on(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapMotorOn)
    }

    fn motor_off(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapMotorOff)
    }

    fn start_capture(&mut self, buffer: &mut [u8]) -> io::Result<ExtendedTransfer> {
        self.handle()?.read_ext(Protocol::Tap, buffer)
    }

    fn start_write(&mut self, data: &[u8]) -> io::Result<ExtendedTransfer> {
        self.handle()?.write_ext(Protocol::Tap, data)
    }

    fn get_ver(&mut self) -> io::Result<u16> {
        self.tape_status(Opcode::TapGetVer)
    }

    fn download_config(&mut self, buffer: &mut [u8]) -> io::Result<ExtendedTransfer> {
        self.handle()?.read_ext(Protocol::TapConfig, buffer)
    }

    fn upload_config(&mut self, data: &[u8]) -> io::Result<ExtendedTransfer> {
        self.handle()?.write_ext(Protocol::TapConfig, data)
    }

    fn tap_break(&mut self) -> io::Result<()> {
        self.handle()?.tap_break()
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::*;
    use super::*;
    use crate::backend::validate;

    fn opened(shared: &Shared) -> Xum1541Backend {
        let host = ScriptedHost::new().with(shared);
        let mut backend = Xum1541Backend::with_host(Box::new(host), &AdapterConfig::default());
        backend.driver_open(None).unwrap();
        backend
    }

    #[test]
    fn test_exports_are_consistent() {
        let backend = Xum1541Backend::new(&AdapterConfig::default());
        let features = validate(backend.exports()).unwrap();
        assert_eq!(features.to_string(), "parallel burst, parallel port, SRQ burst, tape");
    }

    #[test]
    fn test_not_open() {
        let mut backend =
            Xum1541Backend::with_host(Box::new(ScriptedHost::new()), &AdapterConfig::default());
        assert_eq!(
            CbmError::from_io_error(&backend.listen(8, 15).unwrap_err()),
            Some(CbmError::NoBackend)
        );
        assert_eq!(
            CbmError::from_io_error(&backend.driver_open(None).unwrap_err()),
            Some(CbmError::DeviceNotFound)
        );
    }

    #[test]
    fn test_driver_name() {
        let shared = adapter("5", VERSION, 0x01, 0);
        let host = ScriptedHost::new().with_foreign(1, 2).with(&shared);
        let mut backend = Xum1541Backend::with_host(Box::new(host), &AdapterConfig::default());
        assert_eq!(
            backend.driver_name(Some("5")).unwrap(),
            "xum1541 serial 5 at bus 001 device 002"
        );
        assert!(!shared.state().claimed);
    }

    #[test]
    fn test_bus_command_frames() {
        let shared = disk_adapter();
        let mut backend = opened(&shared);
        for _ in 0..6 {
            shared.push_ready(1);
        }
        backend.listen(8, 15).unwrap();
        backend.talk(9, 2).unwrap();
        backend.open(40, 0x13).unwrap();
        backend.close(8, 2).unwrap();
        backend.unlisten().unwrap();
        backend.untalk().unwrap();
        let frames: Vec<Vec<u8>> = shared.bulk_out().into_iter().skip(1).step_by(2).collect();
        assert_eq!(
            frames,
            vec![
                vec![0x28, 0x6F],
                vec![0x49, 0x62],
                vec![0x28, 0xF3],
                vec![0x28, 0xE2],
                vec![0x3F],
                vec![0x5F],
            ]
        );
        let headers: Vec<u8> = shared.bulk_out().iter().step_by(2).map(|h| h[1]).collect();
        assert_eq!(headers, vec![0x12, 0x13, 0x12, 0x12, 0x12, 0x12]);
    }

    #[test]
    fn test_absent_device_is_bus_error() {
        let shared = disk_adapter();
        let mut backend = opened(&shared);
        shared.push_ready(0);
        assert_eq!(
            CbmError::from_io_error(&backend.listen(8, 15).unwrap_err()),
            Some(CbmError::BusError)
        );
        shared.push_status(3, 0);
        assert_eq!(
            CbmError::from_io_error(&backend.talk(8, 15).unwrap_err()),
            Some(CbmError::BusError)
        );
    }

    #[test]
    fn test_line_control() {
        let shared = disk_adapter();
        let mut backend = opened(&shared);
        shared.push_ready(0x05);
        assert_eq!(backend.iec_poll().unwrap(), IecLines::DATA | IecLines::ATN);
        shared.push_ready(0);
        backend.iec_set(IecLines::CLOCK).unwrap();
        shared.push_ready(0);
        backend.iec_release(IecLines::ATN | IecLines::DATA).unwrap();
        shared.push_ready(0x02);
        assert_eq!(backend.iec_wait(IecLines::CLOCK, true).unwrap(), IecLines::CLOCK);
        assert_eq!(
            shared.bulk_out(),
            vec![
                vec![27, 0, 0, 0],
                vec![29, 0x02, 0, 0],
                vec![29, 0, 0x05, 0],
                vec![28, 0x02, 1, 0],
            ]
        );
    }

    #[test]
    fn test_eoi() {
        let shared = disk_adapter();
        let mut backend = opened(&shared);
        shared.push_ready(1);
        assert!(backend.get_eoi().unwrap());
        shared.push_ready(0);
        backend.clear_eoi().unwrap();
        shared.push_ready(0);
        assert!(!backend.get_eoi().unwrap());
    }

    #[test]
    fn test_burst_groups() {
        let shared = disk_adapter();
        let mut backend = opened(&shared);
        shared.push_ready(0xA5);
        assert_eq!(ParallelBurst::read(&mut backend).unwrap(), 0xA5);
        shared.push_ready(0);
        SrqBurst::write(&mut backend, 0x42).unwrap();
        shared.push_data(&[1, 2, 3, 4]);
        let mut buffer = [0u8; 4];
        assert_eq!(ParallelBurst::read_n(&mut backend, &mut buffer).unwrap(), 4);
        assert_eq!(SrqBurst::write_track(&mut backend, &[0x55; 8]).unwrap(), 8);
        shared.push_ready(0x7E);
        assert_eq!(backend.pp_read().unwrap(), 0x7E);

        let out = shared.bulk_out();
        assert_eq!(out[0], vec![30, 0, 0, 0]);
        assert_eq!(out[1], vec![33, 0x42, 0, 0]);
        assert_eq!(out[2], vec![8, 0x70, 4, 0]);
        assert_eq!(out[3], vec![9, 0x80, 8, 0]);
        assert_eq!(out[5], vec![25, 0, 0, 0]);
    }

    #[test]
    fn test_tape_group() {
        let shared = tape_adapter();
        let mut backend = opened(&shared);
        shared.push_ready(0x0100);
        assert_eq!(backend.get_ver().unwrap(), 0x0100);
        shared.push_ready(0x0001);
        assert_eq!(backend.motor_on().unwrap(), 1);
        shared.push_ready(0x0040);
        let transfer = backend.upload_config(&[1, 2, 3]).unwrap();
        assert_eq!(transfer, ExtendedTransfer { status: 0x40, bytes: 3 });
        backend.tap_break().unwrap();

        shared.push_ready(0);
        assert_eq!(
            CbmError::from_io_error(&backend.iec_poll().unwrap_err()),
            Some(CbmError::DiskCmdInTapeMode)
        );
        assert_eq!(shared.state().bulk_in.len(), 1);
    }

    #[test]
    fn test_close_releases_device() {
        let shared = disk_adapter();
        let mut backend = opened(&shared);
        assert!(backend.device().is_some());
        backend.driver_close();
        assert!(backend.device().is_none());
        assert!(shared.state().released);
        assert!(shared.state().closed);
    }
}
