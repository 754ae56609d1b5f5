//! A scripted stand-in for an xum1541 on the USB bus.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::protocol::*;
use super::transport::{UsbCandidate, UsbHost, UsbLink};

#[derive(Debug, Default)]
pub struct LinkState {
    pub product: Option<String>,
    pub serial: Option<String>,
    pub device_info: Vec<u8>,
    pub claim_fails: bool,
    pub configured: Option<u8>,
    pub claimed: bool,
    pub released: bool,
    pub closed: bool,
    /// Every bulk OUT transfer, in order.
    pub bulk_out: Vec<Vec<u8>>,
    /// Replies for bulk IN transfers; an empty queue fails the read.
    pub bulk_in: VecDeque<rusb::Result<Vec<u8>>>,
    /// Overrides for bulk OUT results; when empty, writes succeed in full.
    pub write_results: VecDeque<rusb::Result<usize>>,
    /// (request type, request, index) of every control transfer.
    pub controls: Vec<(u8, u8, u16)>,
    pub halts_cleared: Vec<u8>,
    pub opens: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Shared(Arc<Mutex<LinkState>>);

impl Shared {
    pub fn state(&self) -> MutexGuard<'_, LinkState> {
        self.0.lock().unwrap()
    }

    pub fn push_status(&self, code: u8, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.state().bulk_in.push_back(Ok(vec![code, low, high]));
    }

    pub fn push_ready(&self, value: u16) {
        self.push_status(2, value);
    }

    pub fn push_data(&self, data: &[u8]) {
        self.state().bulk_in.push_back(Ok(data.to_vec()));
    }

    pub fn bulk_out(&self) -> Vec<Vec<u8>> {
        self.state().bulk_out.clone()
    }
}

/// An adapter with the given serial string and INIT response.
pub fn adapter(serial: &str, version: u8, capabilities: u8, status: u8) -> Shared {
    let shared = Shared::default();
    {
        let mut state = shared.state();
        state.product = Some("xum1541 floppy adapter (Bumble-B)".to_string());
        state.serial = Some(serial.to_string());
        state.device_info = vec![version, capabilities, status, 0, 0, 0, 0, 0];
    }
    shared
}

/// A current-firmware adapter in disk mode.
pub fn disk_adapter() -> Shared {
    adapter("000", VERSION, (Capabilities::CBM | Capabilities::TAP).bits(), 0)
}

/// A current-firmware adapter with a tape deck attached.
pub fn tape_adapter() -> Shared {
    adapter(
        "000",
        VERSION,
        (Capabilities::CBM | Capabilities::TAP).bits(),
        AdapterStatus::TAPE_PRESENT.bits(),
    )
}

pub struct ScriptedLink(Shared);

impl Drop for ScriptedLink {
    fn drop(&mut self) {
        self.0.state().closed = true;
    }
}

impl UsbLink for ScriptedLink {
    fn product(&mut self) -> rusb::Result<String> {
        self.0.state().product.clone().ok_or(rusb::Error::Pipe)
    }

    fn serial_number(&mut self) -> rusb::Result<String> {
        self.0.state().serial.clone().ok_or(rusb::Error::Pipe)
    }

    fn set_configuration(&mut self, configuration: u8) -> rusb::Result<()> {
        self.0.state().configured = Some(configuration);
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> rusb::Result<()> {
        let mut state = self.0.state();
        if state.claim_fails {
            return Err(rusb::Error::Busy);
        }
        state.claimed = true;
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> rusb::Result<()> {
        self.0.state().released = true;
        Ok(())
    }

    fn write_bulk(&mut self, _endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        let mut state = self.0.state();
        match state.write_results.pop_front() {
            Some(Ok(n)) => {
                state.bulk_out.push(data[..n].to_vec());
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                state.bulk_out.push(data.to_vec());
                Ok(data.len())
            }
        }
    }

    fn read_bulk(
        &mut self,
        _endpoint: u8,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        match self.0.state().bulk_in.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(rusb::Error::Io),
        }
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        _value: u16,
        index: u16,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.0.state();
        state.controls.push((request_type, request, index));
        let n = state.device_info.len().min(buffer.len());
        buffer[..n].copy_from_slice(&state.device_info[..n]);
        Ok(n)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        _value: u16,
        index: u16,
        _data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.0.state().controls.push((request_type, request, index));
        Ok(0)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        self.0.state().halts_cleared.push(endpoint);
        Ok(())
    }
}

struct ScriptedCandidate {
    vendor_id: u16,
    product_id: u16,
    index: usize,
    shared: Shared,
}

impl UsbCandidate for ScriptedCandidate {
    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn location(&self) -> String {
        format!("bus 001 device {:03}", self.index + 1)
    }

    fn open(&self) -> rusb::Result<Box<dyn UsbLink>> {
        self.shared.state().opens += 1;
        Ok(Box::new(ScriptedLink(self.shared.clone())))
    }
}

/// A host whose buses hold the given devices.
#[derive(Clone, Default)]
pub struct ScriptedHost {
    devices: Vec<(u16, u16, Shared)>,
}

impl ScriptedHost {
    pub fn new() -> ScriptedHost {
        ScriptedHost::default()
    }

    pub fn with(mut self, shared: &Shared) -> ScriptedHost {
        self.devices.push((VENDOR_ID, PRODUCT_ID, shared.clone()));
        self
    }

    pub fn with_foreign(mut self, vendor_id: u16, product_id: u16) -> ScriptedHost {
        self.devices.push((vendor_id, product_id, Shared::default()));
        self
    }
}

impl UsbHost for ScriptedHost {
    fn candidates(&self) -> rusb::Result<Vec<Box<dyn UsbCandidate>>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, (vendor_id, product_id, shared))| {
                Box::new(ScriptedCandidate {
                    vendor_id: *vendor_id,
                    product_id: *product_id,
                    index,
                    shared: shared.clone(),
                }) as Box<dyn UsbCandidate>
            })
            .collect())
    }
}
