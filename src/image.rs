use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::Path;

use memmap::{Mmap, MmapMut, MmapOptions};

use crate::error::CbmError;

/// Host-side storage for data moved to or from drive memory: a mapped file
/// or an in-memory buffer.
pub enum Image {
    ReadOnlyMap(Mmap),
    ReadWriteMap(MmapMut),
    Memory(Box<[u8]>),
}

impl Image {
    pub fn open_memory(length: usize) -> Image {
        Image::Memory(vec![0; length].into_boxed_slice())
    }

    /// Slurp a stream, such as standard input.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Image> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Image::Memory(data.into_boxed_slice()))
    }

    pub fn open_read_only<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = File::open(path)?;
        // Empty files cannot be mapped.
        if file.metadata()?.len() == 0 {
            return Ok(Image::open_memory(0));
        }
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Image::ReadOnlyMap(mmap))
    }

    /// Create (or truncate) a file of `length` bytes and map it writable.
    pub fn create<P: AsRef<Path>>(path: P, length: usize, create_new: bool) -> io::Result<Image> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(!create_new)
            .truncate(!create_new)
            .create_new(create_new)
            .open(path)?;
        file.set_len(length as u64)?;
        if length == 0 {
            return Ok(Image::open_memory(0));
        }
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Image::ReadWriteMap(mmap))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Image::ReadOnlyMap(mmap) => &mmap[..],
            Image::ReadWriteMap(mmap) => &mmap[..],
            Image::Memory(array) => &array[..],
        }
    }

    pub fn as_mut_slice(&mut self) -> io::Result<&mut [u8]> {
        match self {
            Image::ReadOnlyMap(_) => Err(CbmError::InvalidBuffer.into()),
            Image::ReadWriteMap(mmap) => Ok(&mut mmap[..]),
            Image::Memory(array) => Ok(&mut array[..]),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Err(CbmError::InvalidBuffer.into()),
            Image::ReadWriteMap(mmap) => mmap.flush(),
            Image::Memory(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    #[test]
    fn test_memory_image() {
        let mut image = Image::from_reader(&b"M-W"[..]).unwrap();
        assert_eq!(image.as_slice(), b"M-W");
        image.as_mut_slice().unwrap()[0] = b'X';
        assert_eq!(image.as_slice(), b"X-W");
        assert!(image.flush().is_ok());
    }

    #[test]
    fn test_file_image() {
        let path = env::temp_dir().join(format!("cbmbus-image-{}.bin", std::process::id()));
        {
            let mut image = Image::create(&path, 4, false).unwrap();
            image.as_mut_slice().unwrap().copy_from_slice(&[1, 2, 3, 4]);
            image.flush().unwrap();
        }
        let mut image = Image::open_read_only(&path).unwrap();
        assert_eq!(image.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(
            CbmError::from_io_error(&image.as_mut_slice().unwrap_err()),
            Some(CbmError::InvalidBuffer)
        );
        drop(image);
        fs::remove_file(&path).unwrap();
    }
}
