//! Source and destination endpoints.
//!
//! The session needs a little more than `Read`/`Write`: the source's length
//! (to find an embedded signature), absolute seeks, and timestamps. Streams
//! that cannot do these report so instead of failing.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Stdin, Stdout, Write};
use std::time::SystemTime;

pub trait Input: Read {
    /// Total length in bytes, when the source is a seekable file.
    fn size(&mut self) -> Option<u64> {
        None
    }

    /// Seek to an absolute offset. `Ok(false)` means the stream cannot seek.
    fn seek_to(&mut self, _pos: u64) -> io::Result<bool> {
        Ok(false)
    }

    fn modified(&self) -> Option<SystemTime> {
        None
    }
}

pub trait Output: Write {
    /// Flush to storage.
    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }

    fn seek_to(&mut self, _pos: u64) -> io::Result<bool> {
        Ok(false)
    }

    fn set_modified(&mut self, _time: SystemTime) -> io::Result<()> {
        Ok(())
    }
}

fn regular(file: &File) -> bool {
    file.metadata().map(|m| m.is_file()).unwrap_or(false)
}

impl Input for File {
    fn size(&mut self) -> Option<u64> {
        if !regular(self) {
            return None;
        }
        let here = self.stream_position().ok()?;
        let end = self.seek(SeekFrom::End(0)).ok()?;
        self.seek(SeekFrom::Start(here)).ok()?;
        Some(end)
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        if !regular(self) {
            return Ok(false);
        }
        self.seek(SeekFrom::Start(pos))?;
        Ok(true)
    }

    fn modified(&self) -> Option<SystemTime> {
        self.metadata().and_then(|m| m.modified()).ok()
    }
}

impl Output for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        if !regular(self) {
            return Ok(false);
        }
        self.seek(SeekFrom::Start(pos))?;
        Ok(true)
    }

    fn set_modified(&mut self, time: SystemTime) -> io::Result<()> {
        File::set_modified(self, time)
    }
}

impl Input for Stdin {}

impl Input for io::Empty {}

impl Output for Stdout {}

impl<T: AsRef<[u8]>> Input for Cursor<T> {
    fn size(&mut self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        self.set_position(pos);
        Ok(true)
    }
}

impl Output for Cursor<Vec<u8>> {
    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        self.set_position(pos);
        Ok(true)
    }
}

impl Output for Cursor<&mut Vec<u8>> {
    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        self.set_position(pos);
        Ok(true)
    }
}

impl Output for Vec<u8> {}

impl Output for io::Sink {}

impl<T: Input + ?Sized> Input for Box<T> {
    fn size(&mut self) -> Option<u64> {
        (**self).size()
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        (**self).seek_to(pos)
    }

    fn modified(&self) -> Option<SystemTime> {
        (**self).modified()
    }
}

impl<T: Output + ?Sized> Output for Box<T> {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<bool> {
        (**self).seek_to(pos)
    }

    fn set_modified(&mut self, time: SystemTime) -> io::Result<()> {
        (**self).set_modified(time)
    }
}

/// A non-seekable view of any reader, standing in for a pipe.
pub struct Pipe<R>(pub R);

impl<R: Read> Read for Pipe<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> Input for Pipe<R> {}
