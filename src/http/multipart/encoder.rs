//! Per-part encoding state.
//!
//! Each part is emitted as three sections: a preamble (boundary line and
//! part headers), the content, and a postamble (the CRLF closing the part).
//! The message end is a part whose preamble is the closing delimiter and
//! whose content is empty.

use super::channel::WritableChannel;
use super::part::{Part, PartSource, PartStream};
use bytes::{BufMut, Bytes};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

const SCRATCH_SIZE: usize = 8 * 1024;

/// Progress of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultipartState {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Content,
    Postamble,
}

type StreamFactory = Arc<dyn Fn() -> io::Result<Box<dyn PartStream>> + Send + Sync>;

enum Content {
    Empty,
    Bytes(Bytes),
    File {
        path: PathBuf,
        offset: u64,
        length: Option<u64>,
        file: Option<File>,
    },
    Stream {
        open: StreamFactory,
        length: Option<u64>,
        reader: Option<Box<dyn PartStream>>,
        pending: Bytes,
        eof: bool,
    },
}

impl Content {
    fn from_source(source: &PartSource) -> Self {
        match source {
            PartSource::Bytes(b) => Content::Bytes(b.clone()),
            PartSource::File { path, offset, length } => Content::File {
                path: path.clone(),
                offset: *offset,
                length: *length,
                file: None,
            },
            PartSource::Stream { open, length } => Content::Stream {
                open: Arc::clone(open),
                length: *length,
                reader: None,
                pending: Bytes::new(),
                eof: false,
            },
        }
    }
}

fn file_length(path: &PathBuf, offset: u64, declared: Option<u64>) -> io::Result<u64> {
    match declared {
        Some(len) => Ok(len),
        None => Ok(fs::metadata(path)?.len().saturating_sub(offset)),
    }
}

fn short_source() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "part content shorter than declared")
}

/// Encoder for one part of a multipart body.
pub struct MultipartPart {
    preamble: Bytes,
    postamble: Bytes,
    content: Content,
    section: Section,
    state: MultipartState,
    /// Offset into the preamble or postamble being written.
    offset: usize,
    /// Content bytes consumed from the source.
    position: u64,
    slow_target: bool,
    closed: bool,
}

impl fmt::Debug for MultipartPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartPart")
            .field("state", &self.state)
            .field("section", &self.section)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl MultipartPart {
    pub(crate) fn new(name: &str, part: &Part, boundary: &str) -> Self {
        let preamble = format!("--{}\r\n{}\r\n\r\n", boundary, part.format_headers(name));
        Self::with_sections(
            Bytes::from(preamble),
            Content::from_source(&part.source),
            Bytes::from_static(b"\r\n"),
        )
    }

    /// The closing delimiter `--boundary--\r\n`.
    pub(crate) fn message_end(boundary: &str) -> Self {
        let delimiter = format!("--{}--\r\n", boundary);
        Self::with_sections(Bytes::from(delimiter), Content::Empty, Bytes::new())
    }

    fn with_sections(preamble: Bytes, content: Content, postamble: Bytes) -> Self {
        Self {
            preamble,
            postamble,
            content,
            section: Section::Preamble,
            state: MultipartState::NotStarted,
            offset: 0,
            position: 0,
            slow_target: false,
            closed: false,
        }
    }

    pub fn state(&self) -> MultipartState {
        self.state
    }

    pub fn is_target_slow(&self) -> bool {
        self.slow_target
    }

    /// Encoded length of this part, or -1 when the content length is unknown.
    pub fn length(&self) -> io::Result<i64> {
        let content = match &self.content {
            Content::Empty => 0,
            Content::Bytes(b) => b.len() as u64,
            Content::File { path, offset, length, .. } => file_length(path, *offset, *length)?,
            Content::Stream { length: Some(len), .. } => *len,
            Content::Stream { length: None, .. } => return Ok(-1),
        };
        Ok((self.preamble.len() + self.postamble.len()) as i64 + content as i64)
    }

    /// Write as much of the part as fits into `target`.
    pub fn transfer_to<B: BufMut>(&mut self, target: &mut B) -> io::Result<()> {
        if self.state == MultipartState::Done {
            return Ok(());
        }
        self.state = MultipartState::InProgress;

        while target.has_remaining_mut() {
            match self.section {
                Section::Preamble => {
                    if copy_section(&self.preamble, &mut self.offset, target) {
                        self.enter(Section::Content);
                    }
                }
                Section::Content => {
                    if self.content_to_buf(target)? {
                        self.enter(Section::Postamble);
                    }
                }
                Section::Postamble => {
                    if copy_section(&self.postamble, &mut self.offset, target) {
                        self.state = MultipartState::Done;
                        break;
                    }
                }
            }
        }
        // A part whose remaining sections are all empty finishes without room.
        if self.section == Section::Postamble && self.offset == self.postamble.len() {
            self.state = MultipartState::Done;
        }
        Ok(())
    }

    /// Move up to `budget` bytes into `channel`. Stops early and flags the
    /// target as slow when the channel accepts less than it is offered.
    pub fn transfer_to_channel<W>(&mut self, channel: &mut W, budget: u64) -> io::Result<u64>
    where
        W: WritableChannel + ?Sized,
    {
        if self.state == MultipartState::Done {
            return Ok(0);
        }
        self.state = MultipartState::InProgress;
        self.slow_target = false;

        let mut moved = 0u64;
        while moved < budget && !self.slow_target {
            let left = budget - moved;
            match self.section {
                Section::Preamble => {
                    let (n, done) = self.write_section(channel, left, false)?;
                    moved += n;
                    if done {
                        self.enter(Section::Content);
                    }
                }
                Section::Content => {
                    let (n, done) = self.content_to_channel(channel, left)?;
                    moved += n;
                    if done {
                        self.enter(Section::Postamble);
                    }
                }
                Section::Postamble => {
                    let (n, done) = self.write_section(channel, left, true)?;
                    moved += n;
                    if done {
                        self.state = MultipartState::Done;
                        break;
                    }
                }
            }
        }
        Ok(moved)
    }

    /// Release the part's source. Safe to call more than once.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &mut self.content {
            Content::File { file, .. } => {
                file.take();
                Ok(())
            }
            Content::Stream { reader, .. } => match reader.take() {
                Some(mut r) => r.close(),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn enter(&mut self, section: Section) {
        self.section = section;
        self.offset = 0;
    }

    fn write_section<W>(&mut self, channel: &mut W, budget: u64, post: bool) -> io::Result<(u64, bool)>
    where
        W: WritableChannel + ?Sized,
    {
        let bytes = if post { &self.postamble } else { &self.preamble };
        let rest = &bytes[self.offset..];
        let offered = rest.len().min(budget as usize);
        let n = if offered == 0 { 0 } else { channel.write(&rest[..offered])? };
        if n < offered {
            self.slow_target = true;
        }
        self.offset += n;
        Ok((n as u64, self.offset == bytes.len()))
    }

    fn content_to_buf<B: BufMut>(&mut self, target: &mut B) -> io::Result<bool> {
        let position = &mut self.position;
        match &mut self.content {
            Content::Empty => Ok(true),
            Content::Bytes(data) => {
                let start = *position as usize;
                let n = (data.len() - start).min(target.remaining_mut());
                target.put_slice(&data[start..start + n]);
                *position += n as u64;
                Ok(*position as usize == data.len())
            }
            Content::File { path, offset, length, file } => {
                let total = file_length(path, *offset, *length)?;
                *length = Some(total);
                if *position >= total {
                    return Ok(true);
                }
                let f = open_file(file, path, *offset + *position)?;
                let want = ((total - *position) as usize).min(target.remaining_mut()).min(SCRATCH_SIZE);
                let mut scratch = [0u8; SCRATCH_SIZE];
                let n = f.read(&mut scratch[..want])?;
                if n == 0 {
                    return Err(short_source());
                }
                target.put_slice(&scratch[..n]);
                *position += n as u64;
                Ok(*position >= total)
            }
            Content::Stream { open, length, reader, pending, eof } => {
                if !pending.is_empty() {
                    let n = pending.len().min(target.remaining_mut());
                    target.put_slice(&pending.split_to(n));
                    return Ok(*eof && pending.is_empty());
                }
                if *eof || *length == Some(*position) {
                    return Ok(true);
                }
                let r = open_stream(reader, open)?;
                let mut want = target.remaining_mut().min(SCRATCH_SIZE);
                if let Some(len) = *length {
                    want = want.min((len - *position) as usize);
                }
                let mut scratch = [0u8; SCRATCH_SIZE];
                let n = r.read(&mut scratch[..want])?;
                if n == 0 {
                    if length.is_some() {
                        return Err(short_source());
                    }
                    *eof = true;
                    return Ok(true);
                }
                target.put_slice(&scratch[..n]);
                *position += n as u64;
                Ok(*length == Some(*position))
            }
        }
    }

    fn content_to_channel<W>(&mut self, channel: &mut W, budget: u64) -> io::Result<(u64, bool)>
    where
        W: WritableChannel + ?Sized,
    {
        let position = &mut self.position;
        let slow = &mut self.slow_target;
        match &mut self.content {
            Content::Empty => Ok((0, true)),
            Content::Bytes(data) => {
                let start = *position as usize;
                let offered = (data.len() - start).min(budget as usize);
                let n = if offered == 0 { 0 } else { channel.write(&data[start..start + offered])? };
                if n < offered {
                    *slow = true;
                }
                *position += n as u64;
                Ok((n as u64, *position as usize == data.len()))
            }
            Content::File { path, offset, length, file } => {
                let total = file_length(path, *offset, *length)?;
                *length = Some(total);
                let mut moved = 0u64;
                while *position < total && moved < budget {
                    let f = open_file(file, path, *offset + *position)?;
                    let count = (total - *position).min(budget - moved);
                    let n = channel.transfer_from_file(f, *offset + *position, count)?;
                    *position += n;
                    moved += n;
                    if n < count {
                        *slow = true;
                        break;
                    }
                }
                Ok((moved, *position >= total))
            }
            Content::Stream { open, length, reader, pending, eof } => {
                let mut moved = 0u64;
                while moved < budget {
                    if pending.is_empty() {
                        if *eof || *length == Some(*position) {
                            break;
                        }
                        let r = open_stream(reader, open)?;
                        let mut want = SCRATCH_SIZE;
                        if let Some(len) = *length {
                            want = want.min((len - *position) as usize);
                        }
                        let mut scratch = [0u8; SCRATCH_SIZE];
                        let n = r.read(&mut scratch[..want])?;
                        if n == 0 {
                            if length.is_some() {
                                return Err(short_source());
                            }
                            *eof = true;
                            break;
                        }
                        *position += n as u64;
                        *pending = Bytes::copy_from_slice(&scratch[..n]);
                    }
                    let offered = pending.len().min((budget - moved) as usize);
                    let n = channel.write(&pending[..offered])?;
                    let _ = pending.split_to(n);
                    moved += n as u64;
                    if n < offered {
                        *slow = true;
                        break;
                    }
                }
                let done = pending.is_empty() && (*eof || *length == Some(*position));
                Ok((moved, done))
            }
        }
    }
}

fn copy_section<B: BufMut>(bytes: &Bytes, offset: &mut usize, target: &mut B) -> bool {
    let n = (bytes.len() - *offset).min(target.remaining_mut());
    target.put_slice(&bytes[*offset..*offset + n]);
    *offset += n;
    *offset == bytes.len()
}

fn open_file<'a>(slot: &'a mut Option<File>, path: &PathBuf, at: u64) -> io::Result<&'a mut File> {
    if slot.is_none() {
        let mut f = File::open(path)?;
        f.seek(SeekFrom::Start(at))?;
        *slot = Some(f);
    }
    slot.as_mut().ok_or_else(|| io::Error::other("file handle missing"))
}

fn open_stream<'a>(
    slot: &'a mut Option<Box<dyn PartStream>>,
    open: &StreamFactory,
) -> io::Result<&'a mut Box<dyn PartStream>> {
    if slot.is_none() {
        *slot = Some(open()?);
    }
    slot.as_mut().ok_or_else(|| io::Error::other("stream missing"))
}
