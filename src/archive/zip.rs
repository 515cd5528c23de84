//! Streaming ZIP container writer.
//!
//! Entries are written in a single forward pass: a local file header with
//! the data-descriptor flag set, the (optionally deflated) entry bytes, then
//! a data descriptor carrying the CRC and sizes that were unknown when the
//! header went out. Central directory and end-of-central-directory records
//! follow once all entries are appended, with ZIP64 records emitted when an
//! entry size, the entry count, or a directory offset overflows the classic
//! 32/16-bit fields.
//!
//! Nothing is buffered beyond one compressed chunk, so archive size never
//! affects memory use.

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{Datelike, Local, Timelike};
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use std::io;
use tokio::io::AsyncWrite;

const LFH_SIGNATURE: u32 = 0x0403_4b50;
const CDFH_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

// General purpose bits: 3 = sizes in trailing descriptor, 11 = UTF-8 names.
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const FLAG_UTF8: u16 = 0x0800;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
const MADE_BY_UNIX: u16 = 0x0300;

const U32_MAX: u64 = u32::MAX as u64;
const U16_MAX: u64 = u16::MAX as u64;

const DEFLATE_BUF: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }
}

struct OpenEntry {
    name: Vec<u8>,
    method: CompressionMethod,
    header_offset: u64,
    dos_time: u16,
    dos_date: u16,
    crc: Crc,
    uncompressed: u64,
    compressed: u64,
    deflater: Option<Compress>,
}

struct FinishedEntry {
    name: Vec<u8>,
    method: CompressionMethod,
    dos_time: u16,
    dos_date: u16,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    header_offset: u64,
}

impl FinishedEntry {
    fn needs_zip64(&self) -> bool {
        self.compressed >= U32_MAX
            || self.uncompressed >= U32_MAX
            || self.header_offset >= U32_MAX
    }
}

/// Incremental ZIP writer over any async byte sink.
pub struct ZipStreamWriter<W> {
    sink: W,
    offset: u64,
    entries: Vec<FinishedEntry>,
    current: Option<OpenEntry>,
}

impl<W: AsyncWrite + Unpin + Send> ZipStreamWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            offset: 0,
            entries: Vec::new(),
            current: None,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Open a new entry. Sizes and CRC are not known yet; the local header
    /// advertises a trailing data descriptor instead.
    pub async fn begin_entry(&mut self, name: &str, method: CompressionMethod) -> io::Result<()> {
        if self.current.is_some() {
            return Err(io::Error::other("previous entry is still open"));
        }

        let name_bytes = name.as_bytes().to_vec();
        let (dos_time, dos_date) = dos_datetime();
        let header_offset = self.offset;

        let mut buf = Vec::with_capacity(30 + name_bytes.len());
        buf.write_u32::<LittleEndian>(LFH_SIGNATURE)?;
        buf.write_u16::<LittleEndian>(VERSION_DEFAULT)?;
        buf.write_u16::<LittleEndian>(FLAG_DATA_DESCRIPTOR | FLAG_UTF8)?;
        buf.write_u16::<LittleEndian>(method.as_u16())?;
        buf.write_u16::<LittleEndian>(dos_time)?;
        buf.write_u16::<LittleEndian>(dos_date)?;
        buf.write_u32::<LittleEndian>(0)?; // crc32, in descriptor
        buf.write_u32::<LittleEndian>(0)?; // compressed size, in descriptor
        buf.write_u32::<LittleEndian>(0)?; // uncompressed size, in descriptor
        buf.write_u16::<LittleEndian>(name_bytes.len() as u16)?;
        buf.write_u16::<LittleEndian>(0)?; // extra field length
        buf.extend_from_slice(&name_bytes);
        self.write_sink(&buf).await?;

        let deflater = match method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflated => Some(Compress::new(Compression::fast(), false)),
        };

        self.current = Some(OpenEntry {
            name: name_bytes,
            method,
            header_offset,
            dos_time,
            dos_date,
            crc: Crc::new(),
            uncompressed: 0,
            compressed: 0,
            deflater,
        });

        Ok(())
    }

    /// Append bytes to the open entry.
    pub async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let deflated: Option<Vec<u8>> = {
            let entry = self
                .current
                .as_mut()
                .ok_or_else(|| io::Error::other("no entry is open"))?;

            entry.crc.update(data);
            entry.uncompressed += data.len() as u64;

            match entry.deflater.as_mut() {
                None => {
                    entry.compressed += data.len() as u64;
                    None
                }
                Some(deflater) => {
                    let mut out = Vec::with_capacity(DEFLATE_BUF.min(data.len() + 64));
                    deflate_chunk(deflater, data, &mut out)?;
                    entry.compressed += out.len() as u64;
                    Some(out)
                }
            }
        };

        match deflated {
            None => self.write_sink(data).await,
            Some(out) => self.write_sink(&out).await,
        }
    }

    /// Close the open entry: drain the compressor and emit the data
    /// descriptor. ZIP64 descriptors are used when a size overflows 32 bits.
    pub async fn finish_entry(&mut self) -> io::Result<()> {
        let mut entry = self
            .current
            .take()
            .ok_or_else(|| io::Error::other("no entry is open"))?;

        if let Some(deflater) = entry.deflater.as_mut() {
            let mut out = Vec::with_capacity(DEFLATE_BUF);
            deflate_finish(deflater, &mut out)?;
            entry.compressed += out.len() as u64;
            self.write_sink(&out).await?;
        }

        let crc = entry.crc.sum();
        let zip64 = entry.compressed >= U32_MAX || entry.uncompressed >= U32_MAX;

        let mut buf = Vec::with_capacity(24);
        buf.write_u32::<LittleEndian>(DESCRIPTOR_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(crc)?;
        if zip64 {
            buf.write_u64::<LittleEndian>(entry.compressed)?;
            buf.write_u64::<LittleEndian>(entry.uncompressed)?;
        } else {
            buf.write_u32::<LittleEndian>(entry.compressed as u32)?;
            buf.write_u32::<LittleEndian>(entry.uncompressed as u32)?;
        }
        self.write_sink(&buf).await?;

        self.entries.push(FinishedEntry {
            name: entry.name,
            method: entry.method,
            dos_time: entry.dos_time,
            dos_date: entry.dos_date,
            crc,
            compressed: entry.compressed,
            uncompressed: entry.uncompressed,
            header_offset: entry.header_offset,
        });

        Ok(())
    }

    /// Convenience for small in-memory entries such as error placeholders.
    pub async fn add_text_entry(&mut self, name: &str, text: &str) -> io::Result<()> {
        self.begin_entry(name, CompressionMethod::Deflated).await?;
        self.write_chunk(text.as_bytes()).await?;
        self.finish_entry().await
    }

    /// Write the central directory and trailer records, flush, and hand the
    /// sink back to the caller.
    pub async fn finish(mut self) -> io::Result<W> {
        if self.current.is_some() {
            return Err(io::Error::other("an entry is still open"));
        }

        let cd_offset = self.offset;
        let mut buf = Vec::with_capacity(64 * self.entries.len().max(1));
        for entry in &self.entries {
            write_central_header(&mut buf, entry)?;
        }
        let cd_size = buf.len() as u64;
        self.write_sink(&buf).await?;

        let total = self.entries.len() as u64;
        let needs_zip64_eocd =
            total > U16_MAX || cd_size >= U32_MAX || cd_offset >= U32_MAX;

        let mut trailer = Vec::with_capacity(98);
        if needs_zip64_eocd {
            let zip64_eocd_offset = cd_offset + cd_size;

            trailer.write_u32::<LittleEndian>(ZIP64_EOCD_SIGNATURE)?;
            trailer.write_u64::<LittleEndian>(44)?; // record size minus sig+size
            trailer.write_u16::<LittleEndian>(MADE_BY_UNIX | VERSION_ZIP64)?;
            trailer.write_u16::<LittleEndian>(VERSION_ZIP64)?;
            trailer.write_u32::<LittleEndian>(0)?; // this disk
            trailer.write_u32::<LittleEndian>(0)?; // disk with central directory
            trailer.write_u64::<LittleEndian>(total)?;
            trailer.write_u64::<LittleEndian>(total)?;
            trailer.write_u64::<LittleEndian>(cd_size)?;
            trailer.write_u64::<LittleEndian>(cd_offset)?;

            trailer.write_u32::<LittleEndian>(ZIP64_LOCATOR_SIGNATURE)?;
            trailer.write_u32::<LittleEndian>(0)?; // disk with zip64 EOCD
            trailer.write_u64::<LittleEndian>(zip64_eocd_offset)?;
            trailer.write_u32::<LittleEndian>(1)?; // total disks
        }

        trailer.write_u32::<LittleEndian>(EOCD_SIGNATURE)?;
        trailer.write_u16::<LittleEndian>(0)?; // this disk
        trailer.write_u16::<LittleEndian>(0)?; // disk with central directory
        trailer.write_u16::<LittleEndian>(total.min(U16_MAX) as u16)?;
        trailer.write_u16::<LittleEndian>(total.min(U16_MAX) as u16)?;
        trailer.write_u32::<LittleEndian>(cd_size.min(U32_MAX) as u32)?;
        trailer.write_u32::<LittleEndian>(cd_offset.min(U32_MAX) as u32)?;
        trailer.write_u16::<LittleEndian>(0)?; // comment length
        self.write_sink(&trailer).await?;

        tokio::io::AsyncWriteExt::flush(&mut self.sink).await?;
        Ok(self.sink)
    }

    async fn write_sink(&mut self, buf: &[u8]) -> io::Result<()> {
        tokio::io::AsyncWriteExt::write_all(&mut self.sink, buf).await?;
        self.offset += buf.len() as u64;
        Ok(())
    }
}

fn write_central_header(buf: &mut Vec<u8>, entry: &FinishedEntry) -> io::Result<()> {
    let zip64 = entry.needs_zip64();
    let version = if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

    let mut extra = Vec::new();
    if zip64 {
        extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        extra.write_u16::<LittleEndian>(24)?;
        extra.write_u64::<LittleEndian>(entry.uncompressed)?;
        extra.write_u64::<LittleEndian>(entry.compressed)?;
        extra.write_u64::<LittleEndian>(entry.header_offset)?;
    }

    buf.write_u32::<LittleEndian>(CDFH_SIGNATURE)?;
    buf.write_u16::<LittleEndian>(MADE_BY_UNIX | version)?;
    buf.write_u16::<LittleEndian>(version)?;
    buf.write_u16::<LittleEndian>(FLAG_DATA_DESCRIPTOR | FLAG_UTF8)?;
    buf.write_u16::<LittleEndian>(entry.method.as_u16())?;
    buf.write_u16::<LittleEndian>(entry.dos_time)?;
    buf.write_u16::<LittleEndian>(entry.dos_date)?;
    buf.write_u32::<LittleEndian>(entry.crc)?;
    buf.write_u32::<LittleEndian>(entry.compressed.min(U32_MAX) as u32)?;
    buf.write_u32::<LittleEndian>(entry.uncompressed.min(U32_MAX) as u32)?;
    buf.write_u16::<LittleEndian>(entry.name.len() as u16)?;
    buf.write_u16::<LittleEndian>(extra.len() as u16)?;
    buf.write_u16::<LittleEndian>(0)?; // comment length
    buf.write_u16::<LittleEndian>(0)?; // disk number start
    buf.write_u16::<LittleEndian>(0)?; // internal attributes
    buf.write_u32::<LittleEndian>(0)?; // external attributes
    buf.write_u32::<LittleEndian>(entry.header_offset.min(U32_MAX) as u32)?;
    buf.extend_from_slice(&entry.name);
    buf.extend_from_slice(&extra);

    Ok(())
}

fn deflate_chunk(deflater: &mut Compress, data: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
    let mut consumed = 0usize;
    while consumed < data.len() {
        out.reserve(DEFLATE_BUF);
        let before = deflater.total_in();
        deflater
            .compress_vec(&data[consumed..], out, FlushCompress::None)
            .map_err(io::Error::other)?;
        consumed += (deflater.total_in() - before) as usize;
    }
    Ok(())
}

fn deflate_finish(deflater: &mut Compress, out: &mut Vec<u8>) -> io::Result<()> {
    loop {
        out.reserve(DEFLATE_BUF);
        let status = deflater
            .compress_vec(&[], out, FlushCompress::Finish)
            .map_err(io::Error::other)?;
        if status == Status::StreamEnd {
            return Ok(());
        }
    }
}

/// Current local time in the MS-DOS packed format ZIP headers use.
fn dos_datetime() -> (u16, u16) {
    let now = Local::now();
    let year = now.year().clamp(1980, 2107) as u16;
    let date = ((year - 1980) << 9) | ((now.month() as u16) << 5) | now.day() as u16;
    let time =
        ((now.hour() as u16) << 11) | ((now.minute() as u16) << 5) | (now.second() as u16 / 2);
    (time, date)
}
