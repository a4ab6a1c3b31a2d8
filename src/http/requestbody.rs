//! Request bodies: empty, fixed bytes, or a stream of chunks.

use crate::base::neterror::{NetError, RequestError};
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

/// Chunks of a body as they go to the wire.
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Request body for the outbound message.
///
/// The variant decides framing: see [`crate::http::framing::resolve`].
#[derive(Clone, Default)]
pub enum BodyDescriptor {
    /// No body.
    #[default]
    Empty,
    /// Body whose bytes are fully known. Its length is the byte count.
    Fixed(Bytes),
    /// Body produced incrementally, optionally with a declared length.
    Stream(BodyStream),
}

/// A streamed body.
///
/// A live stream can be read once. Bodies that may have to be sent again
/// (auth retries, 307/308 redirects) are first made repeatable with
/// [`BodyDescriptor::into_repeatable`], which buffers the chunks but keeps
/// the declared length, so framing does not change.
#[derive(Clone)]
pub struct BodyStream {
    source: StreamSource,
    known_length: Option<u64>,
}

#[derive(Clone)]
enum StreamSource {
    Live(Arc<Mutex<Option<ChunkStream>>>),
    Replay(Arc<[Bytes]>),
}

impl BodyStream {
    pub fn known_length(&self) -> Option<u64> {
        self.known_length
    }

    pub fn is_repeatable(&self) -> bool {
        matches!(self.source, StreamSource::Replay(_))
    }
}

impl From<String> for BodyDescriptor {
    fn from(s: String) -> Self {
        BodyDescriptor::Fixed(Bytes::from(s))
    }
}

impl From<Vec<u8>> for BodyDescriptor {
    fn from(v: Vec<u8>) -> Self {
        BodyDescriptor::Fixed(Bytes::from(v))
    }
}

impl From<&str> for BodyDescriptor {
    fn from(s: &str) -> Self {
        BodyDescriptor::Fixed(Bytes::from(s.to_owned()))
    }
}

impl From<&[u8]> for BodyDescriptor {
    fn from(s: &[u8]) -> Self {
        BodyDescriptor::Fixed(Bytes::copy_from_slice(s))
    }
}

impl From<Bytes> for BodyDescriptor {
    fn from(b: Bytes) -> Self {
        BodyDescriptor::Fixed(b)
    }
}

impl BodyDescriptor {
    /// Wrap a chunk stream. `known_length` is the length the producer
    /// promises; a stream that breaks the promise fails at send time.
    pub fn stream<S>(chunks: S, known_length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        BodyDescriptor::Stream(BodyStream {
            source: StreamSource::Live(Arc::new(Mutex::new(Some(chunks.boxed())))),
            known_length,
        })
    }

    /// A stream already held in memory, usable any number of times.
    pub fn replayable<I>(chunks: I, known_length: Option<u64>) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        BodyDescriptor::Stream(BodyStream {
            source: StreamSource::Replay(chunks.into_iter().collect()),
            known_length,
        })
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, BodyDescriptor::Empty)
    }

    /// Length when it is known before sending.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            BodyDescriptor::Empty => Some(0),
            BodyDescriptor::Fixed(b) => Some(b.len() as u64),
            BodyDescriptor::Stream(s) => s.known_length,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, BodyDescriptor::Stream(_))
    }

    /// Whether the body can be produced again for a resend.
    pub fn is_repeatable(&self) -> bool {
        match self {
            BodyDescriptor::Empty | BodyDescriptor::Fixed(_) => true,
            BodyDescriptor::Stream(s) => s.is_repeatable(),
        }
    }

    /// Buffer a live stream so it can be sent more than once.
    pub async fn into_repeatable(self) -> Result<Self, RequestError> {
        let BodyDescriptor::Stream(body) = self else {
            return Ok(self);
        };
        if body.is_repeatable() {
            return Ok(BodyDescriptor::Stream(body));
        }
        let chunks: Vec<Bytes> = BodyDescriptor::Stream(body.clone())
            .open()?
            .try_collect()
            .await
            .map_err(|e| {
                RequestError::new(NetError::ConnectionAborted, format!("read body stream: {}", e))
                    .with_source(e)
            })?;
        Ok(BodyDescriptor::replayable(chunks, body.known_length))
    }

    /// The bytes of a body that is fully in memory.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            BodyDescriptor::Empty => Some(Bytes::new()),
            BodyDescriptor::Fixed(b) => Some(b.clone()),
            BodyDescriptor::Stream(BodyStream {
                source: StreamSource::Replay(chunks),
                ..
            }) => {
                let mut all = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
                for c in chunks.iter() {
                    all.extend_from_slice(c);
                }
                Some(Bytes::from(all))
            }
            BodyDescriptor::Stream(_) => None,
        }
    }

    /// Start producing chunks. A live stream can be opened once.
    pub(crate) fn open(&self) -> Result<ChunkStream, RequestError> {
        match self {
            BodyDescriptor::Empty => Ok(stream::empty().boxed()),
            BodyDescriptor::Fixed(b) => Ok(stream::iter([Ok(b.clone())]).boxed()),
            BodyDescriptor::Stream(s) => match &s.source {
                StreamSource::Replay(chunks) => {
                    let chunks: Vec<io::Result<Bytes>> = chunks.iter().cloned().map(Ok).collect();
                    Ok(stream::iter(chunks).boxed())
                }
                StreamSource::Live(cell) => cell
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .ok_or_else(|| {
                        RequestError::new(
                            NetError::UploadStreamRewindNotSupported,
                            "streamed body was already consumed",
                        )
                    }),
            },
        }
    }
}

impl fmt::Debug for BodyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyDescriptor::Empty => f.write_str("Empty"),
            BodyDescriptor::Fixed(b) => f.debug_tuple("Fixed").field(&b.len()).finish(),
            BodyDescriptor::Stream(s) => f
                .debug_struct("Stream")
                .field("known_length", &s.known_length)
                .field("repeatable", &s.is_repeatable())
                .finish(),
        }
    }
}
