//! Append-only commit log.
//!
//! Every committed write transaction becomes one frame:
//!
//! ```text
//! | magic "BKTC" (4) | version (2) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The CRC covers header and payload. The
//! payload is the commit sequence (u64), the operation count (u32) and the
//! operations, each a tag byte followed by length-prefixed byte strings.
//!
//! ## Recovery Policy
//!
//! - **Truncated frame at the tail**: a crash mid-append. The partial frame
//!   is discarded and the log truncated back to the last complete frame.
//! - **Bad magic, unknown version, unknown tag, CRC mismatch**: fatal. The
//!   store refuses to open rather than silently dropping committed data.
//! - **Frame running past the end with a complete frame behind it**: fatal.
//!   The length field is damaged; the frame is not a torn tail.

use crate::error::{CoreError, CoreResult};
use crate::store::snapshot::Snapshot;
use bucketdb_storage::StorageBackend;
use tracing::{info, warn};

/// Magic bytes opening every frame.
pub(crate) const LOG_MAGIC: [u8; 4] = *b"BKTC";

/// Current frame format version.
pub(crate) const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

const TAG_CREATE_BUCKET: u8 = 1;
const TAG_DELETE_BUCKET: u8 = 2;
const TAG_PUT: u8 = 3;
const TAG_DELETE: u8 = 4;
const TAG_SET_SEQUENCE: u8 = 5;

/// A single mutation recorded by a write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogOp {
    CreateBucket {
        name: Vec<u8>,
    },
    DeleteBucket {
        name: Vec<u8>,
    },
    Put {
        bucket: Vec<u8>,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: Vec<u8>,
        key: Vec<u8>,
    },
    SetSequence {
        bucket: Vec<u8>,
        sequence: u64,
    },
}

/// The operations of one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitFrame {
    pub(crate) sequence: u64,
    pub(crate) ops: Vec<LogOp>,
}

impl CommitFrame {
    /// Serializes the frame with its envelope.
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.sequence.to_le_bytes());
        put_len(&mut payload, self.ops.len())?;

        for op in &self.ops {
            match op {
                LogOp::CreateBucket { name } => {
                    payload.push(TAG_CREATE_BUCKET);
                    put_bytes(&mut payload, name)?;
                }
                LogOp::DeleteBucket { name } => {
                    payload.push(TAG_DELETE_BUCKET);
                    put_bytes(&mut payload, name)?;
                }
                LogOp::Put { bucket, key, value } => {
                    payload.push(TAG_PUT);
                    put_bytes(&mut payload, bucket)?;
                    put_bytes(&mut payload, key)?;
                    put_bytes(&mut payload, value)?;
                }
                LogOp::Delete { bucket, key } => {
                    payload.push(TAG_DELETE);
                    put_bytes(&mut payload, bucket)?;
                    put_bytes(&mut payload, key)?;
                }
                LogOp::SetSequence { bucket, sequence } => {
                    payload.push(TAG_SET_SEQUENCE);
                    put_bytes(&mut payload, bucket)?;
                    payload.extend_from_slice(&sequence.to_le_bytes());
                }
            }
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        put_len(&mut frame, payload.len())?;
        frame.extend_from_slice(&payload);

        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Parses a frame payload (envelope already checked).
    fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        let mut reader = Reader::new(payload);
        let sequence = reader.u64()?;
        let count = reader.u32()?;

        let mut ops = Vec::new();
        for _ in 0..count {
            let op = match reader.u8()? {
                TAG_CREATE_BUCKET => LogOp::CreateBucket {
                    name: reader.bytes()?,
                },
                TAG_DELETE_BUCKET => LogOp::DeleteBucket {
                    name: reader.bytes()?,
                },
                TAG_PUT => LogOp::Put {
                    bucket: reader.bytes()?,
                    key: reader.bytes()?,
                    value: reader.bytes()?,
                },
                TAG_DELETE => LogOp::Delete {
                    bucket: reader.bytes()?,
                    key: reader.bytes()?,
                },
                TAG_SET_SEQUENCE => LogOp::SetSequence {
                    bucket: reader.bytes()?,
                    sequence: reader.u64()?,
                },
                tag => {
                    return Err(CoreError::log_corruption(format!(
                        "unknown operation tag {tag}"
                    )))
                }
            };
            ops.push(op);
        }

        if !reader.is_empty() {
            return Err(CoreError::log_corruption(format!(
                "{} trailing bytes in frame {sequence}",
                reader.remaining()
            )));
        }

        Ok(Self { sequence, ops })
    }
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::invalid_argument(format!("{len} exceeds the 4 GiB frame limit")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    put_len(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked cursor over a frame payload.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of frame payload"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Splits raw log bytes into frames.
///
/// Returns the parsed frames and the offset just past the last complete
/// frame. A partial trailing frame stops parsing without error.
fn parse_frames(data: &[u8]) -> CoreResult<(Vec<CommitFrame>, usize)> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }

        if rest[..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(format!(
                "bad frame magic at offset {offset}"
            )));
        }

        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported frame version {version} at offset {offset}"
            )));
        }

        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let body_end = HEADER_SIZE + len;
        if rest.len() < body_end + CRC_SIZE {
            // Only the last frame can be torn. A complete frame behind this
            // one means the length field itself is damaged.
            if let Some(next) = find_complete_frame(&rest[HEADER_SIZE..]) {
                return Err(CoreError::log_corruption(format!(
                    "frame at offset {offset} claims {len} bytes but a complete frame \
                     starts at offset {}",
                    offset + HEADER_SIZE + next
                )));
            }
            break;
        }

        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let computed = compute_crc32(&rest[..body_end]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        frames.push(CommitFrame::decode_payload(&rest[HEADER_SIZE..body_end])?);
        offset += body_end + CRC_SIZE;
    }

    Ok((frames, offset))
}

/// Returns the offset of the first checksummed frame found in `data`.
fn find_complete_frame(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(HEADER_SIZE + CRC_SIZE - 1)).find(|&start| {
        let rest = &data[start..];
        if rest[..4] != LOG_MAGIC || u16::from_le_bytes([rest[4], rest[5]]) != LOG_VERSION {
            return false;
        }
        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let body_end = HEADER_SIZE + len;
        if rest.len() < body_end + CRC_SIZE {
            return false;
        }
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        stored == compute_crc32(&rest[..body_end])
    })
}

/// Result of replaying a commit log.
pub(crate) struct Recovered {
    pub(crate) snapshot: Snapshot,
    pub(crate) next_sequence: u64,
}

/// Writer side of the commit log.
pub(crate) struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    /// Set when a failed append could not be cut back. Nothing more may be
    /// appended behind the partial frame.
    poisoned: bool,
}

impl CommitLog {
    /// Opens the log, replaying every complete frame.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, Recovered)> {
        let data = backend.read_all()?;
        let (frames, valid_len) = parse_frames(&data)?;

        if valid_len < data.len() {
            warn!(
                discarded = data.len() - valid_len,
                "discarding torn frame at the end of the commit log"
            );
            backend.truncate(valid_len as u64)?;
            backend.sync()?;
        }

        let mut snapshot = Snapshot::default();
        let mut last_sequence = 0;
        for frame in &frames {
            if frame.sequence <= last_sequence {
                return Err(CoreError::log_corruption(format!(
                    "commit sequence {} follows {}",
                    frame.sequence, last_sequence
                )));
            }
            last_sequence = frame.sequence;
        }
        let frame_count = frames.len();
        for frame in frames {
            for op in frame.ops {
                snapshot.apply(op)?;
            }
        }

        if frame_count > 0 {
            info!(
                frames = frame_count,
                buckets = snapshot.buckets.len(),
                "replayed commit log"
            );
        }

        Ok((
            Self {
                backend,
                sync_on_commit,
                poisoned: false,
            },
            Recovered {
                snapshot,
                next_sequence: last_sequence + 1,
            },
        ))
    }

    /// Appends one frame and makes it durable.
    ///
    /// On failure the log is cut back to its previous length so a half
    /// written frame never precedes later commits. If that cut fails too,
    /// every later append is refused until the store is reopened, which
    /// drops the partial frame as a torn tail.
    pub(crate) fn append(&mut self, frame: &CommitFrame) -> CoreResult<u64> {
        if self.poisoned {
            return Err(CoreError::log_corruption(
                "commit log ends in a partial frame; reopen the store",
            ));
        }
        let bytes = frame.encode()?;
        let start = self.backend.size()?;

        let written = self.backend.append(&bytes).and_then(|_| {
            if self.sync_on_commit {
                self.backend.sync()
            } else {
                self.backend.flush()
            }
        });

        if let Err(e) = written {
            if let Err(cut) = self.backend.truncate(start) {
                warn!(
                    error = %cut,
                    "could not cut back a failed append, refusing further commits"
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }

        Ok(bytes.len() as u64)
    }

    /// Syncs everything appended so far.
    pub(crate) fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}
