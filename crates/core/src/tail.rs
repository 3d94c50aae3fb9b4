//! Log reader primitives: tail reads, delta reads and metadata probes.
//!
//! All three are stateless; the caller owns the byte offset. A missing file
//! is never an error here: tail reads come back empty, delta reads report a
//! `Deleted` reset, and [`stat`] returns `None`.
//!
//! The file is written concurrently by another process, so every read is
//! bounded by the size observed when the call started and short reads are
//! accepted as-is. Only complete (newline-terminated) lines are consumed; a
//! partial trailing line is left for the next call.

use std::io;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::ReadError;
use crate::types::{FileStat, ResetReason};

/// Default chunk size for backward reading: 8KB.
const CHUNK_SIZE: u64 = 8 * 1024;

/// Upper bound on bytes pulled by one delta read. A single line longer than
/// this is emitted as-is so the reader cannot stall on it.
pub const MAX_DELTA_BYTES: u64 = 8 * 1024 * 1024;

/// Upper bound on bytes scanned backwards by one tail read. Anything older
/// is skipped like lines beyond `max_lines`.
const MAX_TAIL_BYTES: u64 = MAX_DELTA_BYTES;

/// Attempts at a consistent backward read before giving up for this poll.
const TAIL_ATTEMPTS: usize = 3;

/// Result of [`read_tail`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailRead {
    /// Most recent complete lines, oldest first.
    pub lines: Vec<String>,
    /// File length observed at read time.
    pub total_bytes: u64,
    /// Byte just past the last complete line; resume delta reads here.
    pub offset: u64,
}

/// Result of [`read_delta`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaRead {
    pub lines: Vec<String>,
    /// Offset to pass to the next delta read. Equal to the input offset when
    /// nothing complete was appended; meaningless when `was_reset`.
    pub new_offset: u64,
    /// File length observed at read time (0 when the file is gone).
    pub file_size: u64,
    pub was_reset: bool,
    pub reset_reason: Option<ResetReason>,
}

impl DeltaRead {
    fn reset(reason: ResetReason, file_size: u64) -> Self {
        Self {
            lines: Vec::new(),
            new_offset: 0,
            file_size,
            was_reset: true,
            reset_reason: Some(reason),
        }
    }

    fn unchanged(offset: u64, file_size: u64) -> Self {
        Self {
            new_offset: offset,
            file_size,
            ..Self::default()
        }
    }
}

/// Probe the file's metadata. `Ok(None)` when it does not exist.
pub async fn stat(path: &Path) -> Result<Option<FileStat>, ReadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(FileStat::from_metadata(&meta))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ReadError::io(path, e)),
    }
}

/// Read the last `max_lines` complete lines without loading the whole file.
///
/// Strategy: seek to EOF, read backwards in 8KB chunks until enough newlines
/// have been seen, then split. Edge cases handled:
/// - `max_lines == 0` returns no lines but still reports size and offset
/// - Missing or empty file returns an empty result
/// - A partial trailing line (no `\n` yet) is excluded and not consumed
/// - Lines longer than the chunk size are assembled correctly
/// - At most 8MB is scanned; without a newline in that window the offset
///   lands at its start and nothing older is read
pub async fn read_tail(path: &Path, max_lines: usize) -> Result<TailRead, ReadError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TailRead::default()),
        Err(e) => return Err(ReadError::io(path, e)),
    };

    for attempt in 0..TAIL_ATTEMPTS {
        let file_len = file.metadata().await.map_err(|e| ReadError::io(path, e))?.len();
        if file_len == 0 {
            return Ok(TailRead::default());
        }
        match tail_from(&mut file, file_len, max_lines, MAX_TAIL_BYTES).await {
            Ok(Some(read)) => return Ok(read),
            Ok(None) => {
                tracing::debug!(
                    path = %path.display(),
                    attempt,
                    "File shrank during tail read, retrying"
                );
            }
            Err(e) => return Err(ReadError::io(path, e)),
        }
    }

    Ok(TailRead::default())
}

/// One backward pass over at most `budget` bytes. `Ok(None)` means the file
/// shrank under us.
async fn tail_from(
    file: &mut tokio::fs::File,
    file_len: u64,
    max_lines: usize,
    budget: u64,
) -> io::Result<Option<TailRead>> {
    // We need max_lines + 1 newlines to fully delimit max_lines lines from
    // the end (the extra one is the boundary before the first included line).
    let target_newlines = max_lines + 1;
    let mut newline_count = 0usize;
    let mut collected: Vec<u8> = Vec::new();
    let mut remaining = file_len;
    let floor = file_len.saturating_sub(budget);

    while remaining > floor {
        let chunk_len = (remaining - floor).min(CHUNK_SIZE);
        let offset = remaining - chunk_len;

        let mut buf = read_at(file, offset, chunk_len).await?;
        if (buf.len() as u64) < chunk_len {
            return Ok(None);
        }

        newline_count += memchr::memchr_iter(b'\n', &buf).count();

        buf.append(&mut collected);
        collected = buf;
        remaining = offset;

        if newline_count >= target_newlines {
            break;
        }
    }

    // Everything after the last newline is a partial write.
    let Some(last_newline) = memchr::memrchr(b'\n', &collected) else {
        return Ok(Some(TailRead {
            lines: Vec::new(),
            total_bytes: file_len,
            offset: remaining,
        }));
    };
    let offset = remaining + last_newline as u64 + 1;

    let complete = &collected[..last_newline];
    let mut segments: Vec<&[u8]> = complete.split(|&b| b == b'\n').collect();
    // The first segment is cut mid-line unless we reached the start of file.
    if remaining > 0 && !segments.is_empty() {
        segments.remove(0);
    }

    let lines: Vec<String> = segments.into_iter().filter_map(decode_line).collect();
    let start = lines.len().saturating_sub(max_lines);

    Ok(Some(TailRead {
        lines: lines[start..].to_vec(),
        total_bytes: file_len,
        offset,
    }))
}

/// Read complete lines appended since `from_offset`.
///
/// - Missing file: `was_reset` with reason `Deleted`
/// - File smaller than `from_offset`: `was_reset` with reason `Truncated`
/// - At most `max_lines` lines are returned; `new_offset` only moves past
///   the lines actually returned, so the rest is read on the next call
pub async fn read_delta(
    path: &Path,
    from_offset: u64,
    max_lines: usize,
) -> Result<DeltaRead, ReadError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(DeltaRead::reset(ResetReason::Deleted, 0));
        }
        Err(e) => return Err(ReadError::io(path, e)),
    };
    let file_len = file.metadata().await.map_err(|e| ReadError::io(path, e))?.len();

    if file_len < from_offset {
        tracing::info!(
            path = %path.display(),
            old_offset = from_offset,
            new_file_len = file_len,
            "File shrank below consumed offset"
        );
        return Ok(DeltaRead::reset(ResetReason::Truncated, file_len));
    }
    if file_len == from_offset || max_lines == 0 {
        return Ok(DeltaRead::unchanged(from_offset, file_len));
    }

    let to_read = (file_len - from_offset).min(MAX_DELTA_BYTES);
    let buf = read_at(&mut file, from_offset, to_read)
        .await
        .map_err(|e| ReadError::io(path, e))?;

    let (lines, consumed) = split_complete_lines(&buf, max_lines, to_read == MAX_DELTA_BYTES);

    Ok(DeltaRead {
        lines,
        new_offset: from_offset + consumed,
        file_size: file_len,
        was_reset: false,
        reset_reason: None,
    })
}

/// Split up to `max_lines` complete lines off the front of `bytes`.
///
/// Returns the lines and the number of bytes they span (including their
/// terminators). When `force_partial` is set and no newline exists at all,
/// the whole buffer is emitted as one line.
fn split_complete_lines(
    bytes: &[u8],
    max_lines: usize,
    force_partial: bool,
) -> (Vec<String>, u64) {
    let mut lines = Vec::new();
    let mut start = 0usize;
    let mut taken = 0usize;

    for newline in memchr::memchr_iter(b'\n', bytes) {
        if taken == max_lines {
            break;
        }
        if let Some(line) = decode_line(&bytes[start..newline]) {
            lines.push(line);
        }
        taken += 1;
        start = newline + 1;
    }

    if start == 0 && taken == 0 && force_partial && !bytes.is_empty() {
        tracing::warn!(bytes = bytes.len(), "Emitting oversized line without terminator");
        if let Some(line) = decode_line(bytes) {
            lines.push(line);
        }
        return (lines, bytes.len() as u64);
    }

    (lines, start as u64)
}

/// Decode one raw line; drops a trailing `\r` and skips blank lines.
fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(raw).into_owned())
}

/// Read up to `len` bytes at `offset`; a short result means EOF moved.
async fn read_at(file: &mut tokio::fs::File, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    file.seek(io::SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(len as usize);
    (&mut *file).take(len).read_to_end(&mut buf).await?;
    Ok(buf)
}
