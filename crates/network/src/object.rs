use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use libp2p::PeerId;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use dcmanager_types::{ContentHasher, ContentId, DirectoryListing};

use crate::codec::ContentFramed;
use crate::DownloadSession;

/// A retrieved content object. Whether an identifier names a file or a
/// directory is only known once a peer answers.
pub enum ContentObject {
    File(FileStream),
    Directory(DirectoryListing),
}

impl ContentObject {
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}

/// Bytes of a file object as they arrive from the serving peer.
///
/// The stream hashes everything it yields; if the peer closes the stream
/// early, or the bytes do not hash to the identifier, the final read fails
/// with an I/O error instead of reporting end-of-file.
///
/// The stream keeps its session alive until dropped.
pub struct FileStream {
    cid: ContentId,
    size: u64,
    peer: PeerId,
    reader: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
    _session: DownloadSession,
}

impl FileStream {
    pub(crate) fn new(
        cid: ContentId,
        size: u64,
        peer: PeerId,
        framed: ContentFramed,
        session: DownloadSession,
    ) -> Self {
        Self {
            cid,
            size,
            peer,
            reader: StreamReader::new(verified_frames(framed, cid, size)),
            _session: session,
        }
    }

    pub fn cid(&self) -> &ContentId {
        &self.cid
    }

    /// Size announced by the serving peer
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Peer the object is streamed from
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }
}

impl AsyncRead for FileStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

struct Verifier {
    framed: ContentFramed,
    hasher: ContentHasher,
    received: u64,
}

fn verified_frames(
    framed: ContentFramed,
    cid: ContentId,
    size: u64,
) -> BoxStream<'static, io::Result<Bytes>> {
    let verifier = Verifier {
        framed,
        hasher: ContentHasher::new(),
        received: 0,
    };

    stream::unfold(Some(verifier), move |state| async move {
        let mut state = state?;

        match state.framed.next().await {
            Some(Ok(frame)) => {
                state.received += frame.len() as u64;
                if state.received > size {
                    let err = io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("peer sent more than the announced {size} bytes"),
                    );
                    return Some((Err(err), None));
                }

                state.hasher.update(&frame);
                Some((Ok(frame.freeze()), Some(state)))
            }

            Some(Err(e)) => Some((Err(e), None)),

            None if state.received < size => {
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream closed after {} of {size} bytes", state.received),
                );
                Some((Err(err), None))
            }

            None => {
                if state.hasher.finalize() == cid {
                    return None;
                }

                let err = io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("content does not hash to {cid}"),
                );
                Some((Err(err), None))
            }
        }
    })
    .boxed()
}
