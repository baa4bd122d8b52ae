//! Fixed-size binary header of a task record.
//!
//! ```text
//! offset  size  field
//!      0     4  version            i32, big-endian
//!      4     4  status             i32, big-endian
//!      8   128  tags               space-joined, space-padded
//!    136    64  8 x timestamp      f64, big-endian
//!    200    24  6 x section size   i32, big-endian
//! ```
//!
//! The timestamps are, in order: new, pending, submitted, running, aborted,
//! failed, completed, last_modified. The sections follow the header
//! contiguously in [`Section`] order.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{
    FORMAT_VERSION, HEADER_SIZE, SECTION_COUNT, STATUS_OFFSET, TAGS_OFFSET, TAG_FIELD_WIDTH,
    TIMESTAMP_COUNT, TIMES_OFFSET,
};
use crate::types::TaskStatus;

/// Variable-length sections of a record, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Serialized [`TaskPayload`](crate::TaskPayload).
    Params,
    /// Liveness trace copied from the `.pulse` file.
    Pulse,
    /// Captured standard output.
    Stdout,
    /// Captured standard error.
    Stderr,
    /// Serialized result map.
    Result,
    /// Serialized signature map.
    Signature,
}

impl Section {
    /// Every section, in file order.
    pub const ALL: [Section; SECTION_COUNT] = [
        Self::Params,
        Self::Pulse,
        Self::Stdout,
        Self::Stderr,
        Self::Result,
        Self::Signature,
    ];

    /// Position of the section in file order.
    pub fn index(self) -> usize {
        match self {
            Self::Params => 0,
            Self::Pulse => 1,
            Self::Stdout => 2,
            Self::Stderr => 3,
            Self::Result => 4,
            Self::Signature => 5,
        }
    }

    /// Lower-case name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Params => "params",
            Self::Pulse => "pulse",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Result => "result",
            Self::Signature => "signature",
        }
    }
}

/// Seconds since the Unix epoch as a double, the header's time unit.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Reason a header failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDecodeError {
    /// Fewer than [`HEADER_SIZE`] bytes were available.
    Truncated(usize),
    /// The status field holds an unknown code.
    UnknownStatus(i32),
    /// A section size is negative.
    NegativeSize(Section, i32),
}

impl std::fmt::Display for HeaderDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(n) => write!(f, "header truncated to {n} bytes"),
            Self::UnknownStatus(code) => write!(f, "unknown status code {code}"),
            Self::NegativeSize(section, size) => {
                write!(f, "negative {} size {size}", section.name())
            },
        }
    }
}

/// Decoded record header.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHeader {
    /// Format version.
    pub version: i32,
    /// Current status.
    pub status: TaskStatus,
    /// Sorted tags.
    pub tags: Vec<String>,
    /// Transition timestamps indexed by [`TaskStatus::code`], then
    /// `last_modified` in the final slot. Zero until the transition happens.
    pub times: [f64; TIMESTAMP_COUNT],
    /// Compressed size of each [`Section`].
    pub sizes: [u64; SECTION_COUNT],
}

const LAST_MODIFIED: usize = TIMESTAMP_COUNT - 1;

impl TaskHeader {
    /// A fresh header in the `New` state created at `now`.
    pub fn new(tags: Vec<String>, now: f64) -> Self {
        let mut header = Self {
            version: FORMAT_VERSION,
            status: TaskStatus::New,
            tags: Vec::new(),
            times: [0.0; TIMESTAMP_COUNT],
            sizes: [0; SECTION_COUNT],
        };
        header.set_tags(tags);
        header.restart(TaskStatus::New, now);
        header
    }

    /// Time the task entered `status`, zero if it never did.
    pub fn time_of(&self, status: TaskStatus) -> f64 {
        self.times[status.code() as usize]
    }

    /// Time of the last header write.
    pub fn last_modified(&self) -> f64 {
        self.times[LAST_MODIFIED]
    }

    /// Size of one section.
    pub fn size_of(&self, section: Section) -> u64 {
        self.sizes[section.index()]
    }

    /// Byte offset of `section` within the file.
    pub fn offset_of(&self, section: Section) -> u64 {
        HEADER_SIZE as u64 + self.sizes[..section.index()].iter().sum::<u64>()
    }

    /// File length implied by the header.
    pub fn total_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.sizes.iter().sum::<u64>()
    }

    /// Records a transition: sets the status, its timestamp and
    /// `last_modified`. Other timestamps are left alone.
    pub fn mark(&mut self, status: TaskStatus, now: f64) {
        self.status = status;
        self.times[status.code() as usize] = now;
        self.times[LAST_MODIFIED] = now;
    }

    /// Stamps `last_modified` without recording a transition.
    pub fn touch(&mut self, now: f64) {
        self.times[LAST_MODIFIED] = now;
    }

    /// Clears all transition history and execution sections, keeping only
    /// the params section, and enters `status` with `new_time` set to `now`.
    pub fn restart(&mut self, status: TaskStatus, now: f64) {
        self.status = status;
        self.times = [0.0; TIMESTAMP_COUNT];
        self.times[TaskStatus::New.code() as usize] = now;
        self.times[LAST_MODIFIED] = now;
        for section in &Section::ALL[1..] {
            self.sizes[section.index()] = 0;
        }
    }

    /// Replaces the tags, sorted and de-duplicated.
    pub fn set_tags(&mut self, mut tags: Vec<String>) {
        tags.retain(|t| !t.trim().is_empty());
        tags.sort();
        tags.dedup();
        self.tags = tags;
    }

    /// Encodes the header into its fixed-size big-endian form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..STATUS_OFFSET].copy_from_slice(&self.version.to_be_bytes());
        buf[STATUS_OFFSET..TAGS_OFFSET].copy_from_slice(&self.status.code().to_be_bytes());
        buf[TAGS_OFFSET..TIMES_OFFSET].copy_from_slice(&encode_tags(&self.tags));
        let mut pos = TIMES_OFFSET;
        for time in self.times {
            buf[pos..pos + 8].copy_from_slice(&time.to_be_bytes());
            pos += 8;
        }
        // Writers only store blocks that passed `codec::check_size`.
        for size in self.sizes {
            let size = i32::try_from(size).unwrap_or(i32::MAX);
            buf[pos..pos + 4].copy_from_slice(&size.to_be_bytes());
            pos += 4;
        }
        buf
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderDecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderDecodeError::Truncated(bytes.len()));
        }
        let version = read_i32(bytes, 0);
        let code = read_i32(bytes, STATUS_OFFSET);
        let status =
            TaskStatus::from_code(code).map_err(|_| HeaderDecodeError::UnknownStatus(code))?;
        let tags = decode_tags(&bytes[TAGS_OFFSET..TIMES_OFFSET]);

        let mut pos = TIMES_OFFSET;
        let mut times = [0.0; TIMESTAMP_COUNT];
        for time in &mut times {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[pos..pos + 8]);
            *time = f64::from_be_bytes(raw);
            pos += 8;
        }
        let mut sizes = [0u64; SECTION_COUNT];
        for section in Section::ALL {
            let size = read_i32(bytes, pos);
            if size < 0 {
                return Err(HeaderDecodeError::NegativeSize(section, size));
            }
            sizes[section.index()] = size as u64;
            pos += 4;
        }
        Ok(Self {
            version,
            status,
            tags,
            times,
            sizes,
        })
    }
}

fn read_i32(bytes: &[u8], pos: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[pos..pos + 4]);
    i32::from_be_bytes(raw)
}

/// Space-joins tags and pads (or cuts, at a character boundary) to the field
/// width.
pub(crate) fn encode_tags(tags: &[String]) -> [u8; TAG_FIELD_WIDTH] {
    let joined = tags.join(" ");
    let mut end = joined.len().min(TAG_FIELD_WIDTH);
    while !joined.is_char_boundary(end) {
        end -= 1;
    }
    if end < joined.len() {
        tracing::warn!("tags truncated to {TAG_FIELD_WIDTH} bytes: {joined}");
    }
    let mut field = [b' '; TAG_FIELD_WIDTH];
    field[..end].copy_from_slice(&joined.as_bytes()[..end]);
    field
}

pub(crate) fn decode_tags(field: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(field)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
