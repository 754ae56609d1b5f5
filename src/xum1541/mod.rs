//! Backend for the xum1541 USB floppy adapter.
//!
//! The adapter's firmware runs the serial bus itself; the host sends it
//! 4-byte command frames and streamed transfers over a pair of bulk
//! endpoints and collects 3-byte status blocks.  `protocol` holds the wire
//! constants, `Xum1541` one claimed adapter, and `Xum1541Backend` the
//! `Backend` implementation built on it.

mod backend;
mod device;
#[cfg(test)]
mod mock;
pub mod protocol;
mod transport;

pub use self::backend::Xum1541Backend;
pub use self::device::{enumerate, Selection, WaitPolicy, Xum1541};
pub use self::transport::{RusbHost, UsbCandidate, UsbHost, UsbLink};

/// Registry name of this backend.
pub const NAME: &str = "xum1541";
