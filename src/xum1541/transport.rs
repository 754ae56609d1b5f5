//! The host USB stack as seen by the adapter driver.
//!
//! Only the handful of operations the firmware protocol needs are exposed,
//! so that tests can substitute a scripted device for real hardware.

use std::time::Duration;

use log::debug;
use rusb::{Device, DeviceHandle, GlobalContext};

/// An opened USB device.
pub trait UsbLink: Send {
    fn product(&mut self) -> rusb::Result<String>;
    fn serial_number(&mut self) -> rusb::Result<String>;

    fn set_configuration(&mut self, configuration: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    /// A zero timeout waits indefinitely.
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
    fn read_bulk(&mut self, endpoint: u8, buffer: &mut [u8], timeout: Duration)
        -> rusb::Result<usize>;

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()>;
}

/// A device seen during a bus scan, not yet opened.
pub trait UsbCandidate {
    fn vendor_id(&self) -> u16;
    fn product_id(&self) -> u16;
    /// Bus position, for messages.
    fn location(&self) -> String;
    fn open(&self) -> rusb::Result<Box<dyn UsbLink>>;
}

/// Access to every USB bus on the host.
pub trait UsbHost: Send {
    fn candidates(&self) -> rusb::Result<Vec<Box<dyn UsbCandidate>>>;
}

/// The system USB stack through libusb.
#[derive(Clone, Copy, Debug, Default)]
pub struct RusbHost;

impl UsbHost for RusbHost {
    fn candidates(&self) -> rusb::Result<Vec<Box<dyn UsbCandidate>>> {
        let mut candidates: Vec<Box<dyn UsbCandidate>> = Vec::new();
        for device in rusb::devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!(
                        "skipping device at bus {} address {}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };
            candidates.push(Box::new(RusbCandidate {
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                product_index: descriptor.product_string_index(),
                serial_index: descriptor.serial_number_string_index(),
                device,
            }));
        }
        Ok(candidates)
    }
}

struct RusbCandidate {
    device: Device<GlobalContext>,
    vendor_id: u16,
    product_id: u16,
    product_index: Option<u8>,
    serial_index: Option<u8>,
}

impl UsbCandidate for RusbCandidate {
    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn location(&self) -> String {
        format!(
            "bus {:03} device {:03}",
            self.device.bus_number(),
            self.device.address()
        )
    }

    fn open(&self) -> rusb::Result<Box<dyn UsbLink>> {
        Ok(Box::new(RusbLink {
            handle: self.device.open()?,
            product_index: self.product_index,
            serial_index: self.serial_index,
        }))
    }
}

struct RusbLink {
    handle: DeviceHandle<GlobalContext>,
    product_index: Option<u8>,
    serial_index: Option<u8>,
}

impl RusbLink {
    fn string(&self, index: Option<u8>) -> rusb::Result<String> {
        match index {
            Some(index) => self.handle.read_string_descriptor_ascii(index),
            None => Err(rusb::Error::NotFound),
        }
    }
}

impl UsbLink for RusbLink {
    fn product(&mut self) -> rusb::Result<String> {
        self.string(self.product_index)
    }

    fn serial_number(&mut self) -> rusb::Result<String> {
        self.string(self.serial_index)
    }

    fn set_configuration(&mut self, configuration: u8) -> rusb::Result<()> {
        self.handle.set_active_configuration(configuration)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.release_interface(interface)
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, data, timeout)
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle.read_bulk(endpoint, buffer, timeout)
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .read_control(request_type, request, value, index, buffer, timeout)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        self.handle.clear_halt(endpoint)
    }
}
