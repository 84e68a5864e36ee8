// Copyright © 2024 Pathway

//! Length-prefixed duplex framing over the worker socket.
//!
//! Every integer is big-endian and fixed-width. A frame is an `i32` length
//! followed by that many bytes; the lengths in [`SpecialLength`] are control
//! events and are never interpreted as byte counts.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Ipv4Addr, TcpStream};

use log::debug;

use crate::engine::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialLength {
    EndOfDataSection,
    ExceptionThrown,
    TimingData,
    EndOfStream,
    Null,
    StartArrowStream,
}

impl SpecialLength {
    pub const ALL: [Self; 6] = [
        Self::EndOfDataSection,
        Self::ExceptionThrown,
        Self::TimingData,
        Self::EndOfStream,
        Self::Null,
        Self::StartArrowStream,
    ];

    pub fn code(self) -> i32 {
        match self {
            Self::EndOfDataSection => -1,
            Self::ExceptionThrown => -2,
            Self::TimingData => -3,
            Self::EndOfStream => -4,
            Self::Null => -5,
            Self::StartArrowStream => -6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|special| special.code() == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Control(SpecialLength),
}

/// Reading half of the channel.
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buffer = [0; N];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_int(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_long(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let [byte] = self.read_array()?;
        Ok(byte != 0)
    }

    /// Reads a non-negative count, rejecting sentinels and other negative values.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_int()?;
        usize::try_from(count).map_err(|_| Error::MalformedLength(count))
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        let length = self.read_int()?;
        if let Ok(length) = usize::try_from(length) {
            let mut payload = vec![0; length];
            self.inner.read_exact(&mut payload)?;
            return Ok(Frame::Data(payload));
        }
        SpecialLength::from_code(length)
            .map(Frame::Control)
            .ok_or(Error::MalformedLength(length))
    }

    /// Reads a frame that must carry data.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        match self.read_frame()? {
            Frame::Data(payload) => Ok(payload),
            Frame::Control(actual) => Err(Error::UnexpectedControl {
                expected: "data frame",
                actual,
            }),
        }
    }

    pub fn read_utf8(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Writing half of the channel.
pub struct FrameWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub fn write_int(&mut self, value: i32) -> Result<()> {
        self.inner.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    pub fn write_long(&mut self, value: i64) -> Result<()> {
        self.inner.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.inner.write_all(&[u8::from(value)])?;
        Ok(())
    }

    pub fn write_special(&mut self, special: SpecialLength) -> Result<()> {
        self.write_int(special.code())
    }

    pub fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count).map_err(|_| Error::FrameTooLarge(count))?;
        self.write_int(count)
    }

    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.write_count(payload.len())?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    pub fn write_utf8(&mut self, value: &str) -> Result<()> {
        self.write_frame(value.as_bytes())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes the buffer and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|error| Error::Io(error.into_error()))
    }
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Connects to a local port and authenticates with the shared secret.
pub fn connect_and_authenticate(
    port: u16,
    secret: &str,
) -> Result<(FrameReader<TcpStream>, FrameWriter<TcpStream>)> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    let mut reader = FrameReader::new(stream.try_clone()?);
    let mut writer = FrameWriter::new(stream);
    writer.write_utf8(secret)?;
    writer.flush()?;
    let reply = reader.read_utf8()?;
    if reply != "ok" {
        return Err(Error::AuthenticationFailed(format!(
            "unexpected reply {reply:?} on port {port}"
        )));
    }
    debug!("Authenticated connection on port {port}");
    Ok((reader, writer))
}
