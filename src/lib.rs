//! This is a Rust library for talking to Commodore Business Machines (CBM)
//! serial-bus peripherals, such as the 1541 disk drive, from a modern host.
//! The bus is reached through an adapter; the xum1541 USB adapter is
//! supported out of the box, and further adapters can be plugged in as
//! backends.
//!
//! Features:
//!
//! * Address devices with LISTEN, TALK, OPEN, CLOSE, UNLISTEN and UNTALK,
//! and move raw bytes to and from them.
//! * Sense and drive the individual bus lines (ATN, CLOCK, DATA, RESET).
//! * Read the drive status channel, send DOS commands, and identify the drive
//! model from its ROM.
//! * Upload to and download from drive memory with `M-W`/`M-R`, including
//! the workaround for the page 2 quirk of the 154x/157x/1581 ROMs.
//! * Parallel burst, parallel port, fast serial (SRQ) burst, and datasette
//! access on adapters that provide them.
//! * Convert between plain data and the GCR encoding used on disk.
//! * A sample `cbmctrl` program for operating the bus from the command line.
//!
//! # Example
//!
//! The following example opens the default adapter, prints the status of
//! drive 8, and reads the first bytes of its zero page:
//!
//! ```no_run
//! use std::io;
//! use cbmbus::{drive, memory, AdapterSpec, Hex, Session};
//! # fn show_drive() -> io::Result<()> {
//!
//! let mut session = Session::connect(&AdapterSpec::default())?;
//! println!("{}", drive::device_status(&mut session, 8));
//!
//! let mut zero_page = [0u8; 32];
//! let n = memory::download(&mut session, 8, 0x0000, &mut zero_page)?;
//! println!("{}", Hex::at(0x0000, &zero_page[..n]));
//! # Ok(())
//! # }
//! ```
//!
//! # Design of bus access
//!
//! Bus access is layered:
//!
//! 1. A `Backend` implements the bus primitives for one kind of adapter.
//!    Optional capabilities come in all-or-nothing groups (`ParallelBurst`,
//!    `ParallelPort`, `SrqBurst`, `Tape`).
//! 2. The `Resolver` picks a backend by name from a `Registry`, checks that
//!    its exported operations form complete groups, and opens it.
//! 3. A `Session` owns the opened backend.  Closing or dropping the session
//!    closes the adapter; afterwards every operation fails with `NoBackend`.
//! 4. `drive` and `memory` compose the primitives into the DOS-level
//!    conventions of the command channel.
//!
//! Adapters are selected with a `name[:port]` string.  The default comes
//! from the configuration file named by `CBMBUS_CONFIG` or from
//! `CBMBUS_ADAPTER`; see `config` for details.
//!
//! The xum1541 latches disk or tape mode when it is opened, and refuses
//! commands for the other mode.  A USB failure in the middle of a command
//! leaves the adapter's framing unknown, so the handle then refuses further
//! work until the session is reopened.
//!
//! # License
//!
//! Cbmbus is distributed under the terms of both the MIT license and the
//! Apache License (Version 2.0).
//!
//! See LICENSE-APACHE and LICENSE-MIT for details.

pub mod backend;
pub mod bus;
pub mod config;
pub mod drive;
pub mod gcr;
pub mod image;
pub mod memory;
pub mod xum1541;

mod error;
mod util;

pub use crate::backend::{Backend, IecLines};
pub use crate::bus::Session;
pub use crate::config::{AdapterSpec, Config};
pub use crate::error::CbmError;
pub use crate::util::{hex, Hex};
