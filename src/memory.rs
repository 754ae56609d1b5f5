//! Reading and writing drive RAM with the `M-W` and `M-R` commands.

use std::io;

use log::{debug, trace, warn};

use crate::bus::Session;
use crate::drive::{exec_command, COMMAND_CHANNEL};
use crate::error::CbmError;

/// Largest payload of one `M-W` command.
pub const UPLOAD_SLICE: usize = 32;
/// Largest payload of one `M-R` command.
pub const DOWNLOAD_SLICE: usize = 256;

const PAGE_SIZE: usize = 0x100;

fn failed(operation: &str, address: u16, error: io::Error) -> io::Error {
    warn!("{} failed at {:#06x}: {}", operation, address, error);
    CbmError::TransferFailed.into()
}

/// Write `data` into the memory of `device` starting at `address`.  The
/// transfer stops at the first failure, which is reported as
/// `TransferFailed`.
pub fn upload(session: &mut Session, device: u8, address: u16, data: &[u8]) -> io::Result<usize> {
    let mut address = address;
    let mut written = 0;
    for slice in data.chunks(UPLOAD_SLICE) {
        let [low, high] = address.to_le_bytes();
        let command = [b'M', b'-', b'W', low, high, slice.len() as u8];
        trace!("M-W {:#06x} {} bytes", address, slice.len());

        session
            .listen(device, COMMAND_CHANNEL)
            .map_err(|e| failed("upload", address, e))?;
        for part in [&command[..], slice] {
            match session.raw_write(part) {
                Ok(n) if n == part.len() => {}
                Ok(n) => {
                    let short = io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("{} of {} bytes accepted", n, part.len()),
                    );
                    return Err(failed("upload", address, short));
                }
                Err(e) => return Err(failed("upload", address, e)),
            }
        }
        // The drive runs the command once it is unlistened.
        session.unlisten().map_err(|e| failed("upload", address, e))?;

        address = address.wrapping_add(slice.len() as u16);
        written += slice.len();
    }
    debug!("uploaded {} bytes", written);
    Ok(written)
}

/// Fill `buffer` from the memory of `device` starting at `address`.
///
/// Transfers never cross a page.  Some drives answer a read that covers
/// $02D4 ($02CF on the 1581) with a CR in place of that byte and no
/// trailing CR.  The first time this happens in page 2 the read resumes at
/// the byte that was replaced; a second time is a failure.
pub fn download(
    session: &mut Session,
    device: u8,
    address: u16,
    buffer: &mut [u8],
) -> io::Result<usize> {
    let mut address = address;
    let mut done = 0;
    let mut page2_retried = false;

    while done < buffer.len() {
        let in_page = PAGE_SIZE - usize::from(address & 0xFF);
        let count = (buffer.len() - done).min(DOWNLOAD_SLICE).min(in_page);
        let [low, high] = address.to_le_bytes();
        let command = [b'M', b'-', b'R', low, high, count as u8, b'\r'];
        trace!("M-R {:#06x} {} bytes", address, count);

        exec_command(session, device, &command).map_err(|e| failed("download", address, e))?;
        session
            .talk(device, COMMAND_CHANNEL)
            .map_err(|e| failed("download", address, e))?;

        let read = session
            .raw_read(&mut buffer[done..done + count])
            .map_err(|e| failed("download", address, e))?;
        address = address.wrapping_add(read as u16);
        done += read;

        let mut cr = [0u8; 1];
        let terminated = session
            .raw_read(&mut cr)
            .map_err(|e| failed("download", address, e))?
            == 1;
        if !terminated {
            if address >> 8 == 2 && !page2_retried && read > 0 {
                warn!("drive cut the read short at {:#06x}, resuming there", address.wrapping_sub(1));
                page2_retried = true;
                address = address.wrapping_sub(1);
                done -= 1;
                continue;
            }
            let missing = io::Error::new(io::ErrorKind::UnexpectedEof, "no CR after data");
            return Err(failed("download", address, missing));
        }
        session.untalk().map_err(|e| failed("download", address, e))?;

        if read == 0 {
            let empty = io::Error::new(io::ErrorKind::UnexpectedEof, "no data");
            return Err(failed("download", address, empty));
        }
    }
    debug!("downloaded {} bytes", done);
    Ok(done)
}
