//! Dump stream format
//!
//! ```text
//! header:  "RSDUMP" (6 bytes) | version (u8)
//! frame:   kind (u8) | payload length (u32 LE) | JSON payload
//! trailer: end frame (kind 0xFF, length 0)
//! ```
//!
//! Frames appear grouped by kind in the order nodes, users, items,
//! feedback. A stream without its end frame is truncated.

use recserve_common::{Error, Feedback, Item, NodeRecord, Result, User};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Format constants ──────────────────────────────────────────────────────────

pub const MAGIC: &[u8; 6] = b"RSDUMP";
pub const VERSION: u8 = 1;

const KIND_NODE: u8 = 1;
const KIND_USER: u8 = 2;
const KIND_ITEM: u8 = 3;
const KIND_FEEDBACK: u8 = 4;
const KIND_END: u8 = 0xFF;

/// Largest payload accepted from a stream
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

// ── Records ───────────────────────────────────────────────────────────────────

/// One record of a dump stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Node(NodeRecord),
    User(User),
    Item(Item),
    Feedback(Feedback),
}

impl Record {
    const fn kind(&self) -> u8 {
        match self {
            Self::Node(_) => KIND_NODE,
            Self::User(_) => KIND_USER,
            Self::Item(_) => KIND_ITEM,
            Self::Feedback(_) => KIND_FEEDBACK,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Node(node) => serde_json::to_vec(node),
            Self::User(user) => serde_json::to_vec(user),
            Self::Item(item) => serde_json::to_vec(item),
            Self::Feedback(feedback) => serde_json::to_vec(feedback),
        };
        payload.map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(kind: u8, payload: &[u8]) -> Result<Self> {
        let record = match kind {
            KIND_NODE => serde_json::from_slice(payload).map(Self::Node),
            KIND_USER => serde_json::from_slice(payload).map(Self::User),
            KIND_ITEM => serde_json::from_slice(payload).map(Self::Item),
            KIND_FEEDBACK => serde_json::from_slice(payload).map(Self::Feedback),
            other => {
                return Err(Error::invalid_argument(format!(
                    "unknown dump frame kind {other:#04x}"
                )));
            }
        };
        record.map_err(|e| Error::invalid_argument(format!("malformed dump record: {e}")))
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Writes a dump stream. The header goes out on [`DumpWriter::start`], the
/// trailer on [`DumpWriter::finish`].
pub struct DumpWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> DumpWriter<W> {
    pub async fn start(mut inner: W) -> Result<Self> {
        inner.write_all(MAGIC).await?;
        inner.write_u8(VERSION).await?;
        Ok(Self { inner })
    }

    pub async fn write(&mut self, record: &Record) -> Result<()> {
        let payload = record.encode()?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                Error::Serialization(format!("dump record of {} bytes", payload.len()))
            })?;
        self.inner.write_u8(record.kind()).await?;
        self.inner.write_u32_le(len).await?;
        self.inner.write_all(&payload).await?;
        Ok(())
    }

    /// Write the end frame, flush and hand back the sink.
    pub async fn finish(mut self) -> Result<W> {
        self.inner.write_u8(KIND_END).await?;
        self.inner.write_u32_le(0).await?;
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Reads a dump stream frame by frame.
pub struct DumpReader<R> {
    inner: R,
    finished: bool,
}

impl<R: AsyncRead + Unpin> DumpReader<R> {
    /// Check the header. A foreign or newer stream is rejected.
    pub async fn open(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; 6];
        read_exact(&mut inner, &mut magic).await?;
        if &magic != MAGIC {
            return Err(Error::invalid_argument("not a dump stream"));
        }
        let version = read_u8(&mut inner).await?;
        if version != VERSION {
            return Err(Error::invalid_argument(format!(
                "unsupported dump version {version}"
            )));
        }
        Ok(Self {
            inner,
            finished: false,
        })
    }

    /// Next record, or `None` once the end frame has been read.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.finished {
            return Ok(None);
        }
        let kind = read_u8(&mut self.inner).await?;
        let mut len = [0u8; 4];
        read_exact(&mut self.inner, &mut len).await?;
        let len = u32::from_le_bytes(len);
        if kind == KIND_END {
            self.finished = true;
            return Ok(None);
        }
        if len > MAX_FRAME_LEN {
            return Err(Error::invalid_argument(format!(
                "dump frame of {len} bytes exceeds the limit"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        read_exact(&mut self.inner, &mut payload).await?;
        Record::decode(kind, &payload).map(Some)
    }
}

async fn read_u8<R: AsyncRead + Unpin>(inner: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    read_exact(inner, &mut byte).await?;
    Ok(byte[0])
}

/// `read_exact` with end-of-stream reported as a truncated dump.
async fn read_exact<R: AsyncRead + Unpin>(inner: &mut R, buf: &mut [u8]) -> Result<()> {
    match inner.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::invalid_argument("truncated dump stream"))
        }
        Err(e) => Err(e.into()),
    }
}
