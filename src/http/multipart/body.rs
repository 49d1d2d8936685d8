//! Streaming multipart body.

use super::channel::WritableChannel;
use super::encoder::{MultipartPart, MultipartState};
use bytes::BufMut;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Upper bound on bytes moved by one [`MultipartBody::transfer_to_channel`] call.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024;

/// Result of a buffer transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// More data may follow; call again.
    Continue,
    /// The body was already complete; nothing was written.
    Stop,
}

/// Result of a channel transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransfer {
    Moved(u64),
    /// The body was already complete when the call started.
    Exhausted,
}

/// Encodes an ordered list of parts into a multipart byte stream.
///
/// The body is pull-driven: callers hand it a bounded buffer or a channel
/// and it writes as much as fits, resuming from the same point next time.
#[derive(Debug)]
pub struct MultipartBody {
    parts: Vec<MultipartPart>,
    content_type: String,
    boundary: String,
    content_length: i64,
    current: usize,
    done: bool,
    transferred: u64,
    closed: AtomicBool,
}

impl MultipartBody {
    pub(crate) fn new(parts: Vec<MultipartPart>, content_type: String, boundary: String) -> Self {
        let content_length = compute_content_length(&parts);
        let done = parts.is_empty();
        Self {
            parts,
            content_type,
            boundary,
            content_length,
            current: 0,
            done,
            transferred: 0,
            closed: AtomicBool::new(false),
        }
    }

    /// Total encoded length, or -1 when some part's length is unknown.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// The length as an option, for APIs that take one.
    pub fn known_length(&self) -> Option<u64> {
        u64::try_from(self.content_length).ok()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bytes emitted so far across both transfer modes.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn part_states(&self) -> impl Iterator<Item = MultipartState> + '_ {
        self.parts.iter().map(MultipartPart::state)
    }

    /// Fill `target` with the next bytes of the body.
    ///
    /// The target must be bounded (for example `(&mut buf).limit(n)`); the
    /// loop runs until it is full or every part is done. Returns
    /// [`BodyState::Stop`] only when the body was already complete on entry.
    pub fn transfer_to<B: BufMut>(&mut self, target: &mut B) -> io::Result<BodyState> {
        if self.done {
            return Ok(BodyState::Stop);
        }
        self.ensure_open()?;

        while target.has_remaining_mut() && self.current < self.parts.len() {
            let before = target.remaining_mut();
            let part = &mut self.parts[self.current];
            part.transfer_to(target)?;
            self.transferred += before.saturating_sub(target.remaining_mut()) as u64;
            if part.state() == MultipartState::Done {
                self.current += 1;
            }
        }
        if self.current == self.parts.len() {
            self.done = true;
        }
        Ok(BodyState::Continue)
    }

    /// Move up to [`DEFAULT_CHUNK_SIZE`] bytes into `channel`, stopping early
    /// when the channel signals back-pressure.
    pub fn transfer_to_channel<W>(&mut self, channel: &mut W) -> io::Result<ChannelTransfer>
    where
        W: WritableChannel + ?Sized,
    {
        if self.done {
            return Ok(ChannelTransfer::Exhausted);
        }
        self.ensure_open()?;

        let mut moved = 0u64;
        while moved < DEFAULT_CHUNK_SIZE && self.current < self.parts.len() {
            let part = &mut self.parts[self.current];
            moved += part.transfer_to_channel(channel, DEFAULT_CHUNK_SIZE - moved)?;
            if part.state() == MultipartState::Done {
                self.current += 1;
            } else if part.is_target_slow() {
                break;
            }
        }
        if self.current == self.parts.len() {
            self.done = true;
        }
        self.transferred += moved;
        Ok(ChannelTransfer::Moved(moved))
    }

    /// Close every part. Runs once; later calls are no-ops. Failures are
    /// logged and do not stop the remaining parts from closing.
    pub fn close(&mut self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for (index, part) in self.parts.iter_mut().enumerate() {
            if let Err(e) = part.close() {
                tracing::warn!(part = index, error = %e, "failed to close multipart part");
            }
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "multipart body closed"));
        }
        Ok(())
    }
}

impl Drop for MultipartBody {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sum of part lengths; -1 if any is unknown, 0 if a lookup fails.
fn compute_content_length(parts: &[MultipartPart]) -> i64 {
    let mut total = 0i64;
    for part in parts {
        match part.length() {
            Ok(len) if len < 0 => return -1,
            Ok(len) => total += len,
            Err(e) => {
                tracing::error!(error = %e, "failed to compute multipart content length");
                return 0;
            }
        }
    }
    total
}
