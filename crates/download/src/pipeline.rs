use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dcmanager_metrics::DownloadMetrics;
use dcmanager_types::TransmitStatus;

use crate::{ChunkDecoder, DownloadError, ProgressSink, SymmetricKey, Throttled};

const READ_BUF_SIZE: usize = 256 * 1024;

/// Default number of decoded units queued between the two stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Two-stage pipeline turning a stored content stream into a local file.
///
/// The first stage reads the stream and decodes it unit by unit, the second
/// writes the decoded units out. They are joined by a bounded channel, so a
/// slow disk holds back reading from the network.
#[derive(Clone, Debug)]
pub struct StreamDecryptor {
    key: Option<SymmetricKey>,
    channel_capacity: usize,
}

impl StreamDecryptor {
    pub fn new(key: Option<SymmetricKey>) -> Self {
        Self {
            key,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn key(&self) -> Option<&SymmetricKey> {
        self.key.as_ref()
    }

    /// Decodes `reader` into a file at `path`, replacing any existing file,
    /// and returns the number of bytes written.
    ///
    /// Intermediate progress reaches `progress` at most once per
    /// [`PROGRESS_INTERVAL`](crate::PROGRESS_INTERVAL); exactly one terminal
    /// report follows when the pipeline stops, for any reason. On failure
    /// whatever was written so far stays on disk.
    pub async fn decrypt_to_file<R>(
        &self,
        reader: R,
        path: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let progress = Throttled::new(progress);
        let total = AtomicU64::new(0);

        let result = self.write_file(reader, path, &progress, &total, cancel).await;

        let status = match &result {
            Ok(_) => TransmitStatus::Success,
            Err(_) => TransmitStatus::Failed,
        };
        progress.report(status, total.load(Ordering::Relaxed));

        result
    }

    /// Decodes one file of a larger transfer.
    ///
    /// `total` counts the bytes of the whole transfer and is what intermediate
    /// reports carry. No terminal report is made; that is up to the caller.
    /// Returns the bytes written to this file.
    pub(crate) async fn write_file<R>(
        &self,
        reader: R,
        path: &Path,
        progress: &dyn ProgressSink,
        total: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let written = AtomicU64::new(0);

        let result = tokio::select! {
            () = cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.run(reader, path, progress, total, &written) => result,
        };

        let bytes = written.load(Ordering::Relaxed);

        match &result {
            Ok(_) => debug!(path = %path.display(), bytes, "File written"),
            Err(e) => warn!(path = %path.display(), bytes, "File download failed: {e}"),
        }

        result
    }

    async fn run<R>(
        &self,
        mut reader: R,
        path: &Path,
        progress: &dyn ProgressSink,
        total: &AtomicU64,
        written: &AtomicU64,
    ) -> Result<u64, DownloadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let metrics = DownloadMetrics::global();
        let (tx, mut rx) = mpsc::channel::<Bytes>(self.channel_capacity);

        let mut decoder = ChunkDecoder::new(self.key.clone());

        let decode = async move {
            let mut buf = vec![0; READ_BUF_SIZE];

            loop {
                let n = reader.read(&mut buf).await.map_err(DownloadError::Stream)?;
                if n == 0 {
                    break;
                }

                for unit in decoder.push(&buf[..n])? {
                    metrics.units_decoded.inc();
                    forward(&tx, unit).await?;
                }
            }

            if let Some(unit) = decoder.finish()? {
                metrics.units_decoded.inc();
                forward(&tx, unit).await?;
            }

            Ok::<_, DownloadError>(())
        };

        let write = async move {
            let file = File::create(path)
                .await
                .map_err(|e| DownloadError::write(path, e))?;

            let mut out = BufWriter::new(file);

            while let Some(unit) = rx.recv().await {
                out.write_all(&unit)
                    .await
                    .map_err(|e| DownloadError::write(path, e))?;

                let len = unit.len() as u64;
                written.fetch_add(len, Ordering::Relaxed);
                let sum = total.fetch_add(len, Ordering::Relaxed) + len;

                metrics.bytes_written.inc_by(len);
                progress.report(TransmitStatus::Transmitting, sum);
            }

            out.flush().await.map_err(|e| DownloadError::write(path, e))?;

            Ok::<_, DownloadError>(written.load(Ordering::Relaxed))
        };

        // The writing stage drains what was decoded before a decoding failure,
        // and a writing failure drops the receiver, which stops the decoder.
        let (decoded, bytes) = tokio::join!(decode, write);
        let bytes = bytes?;
        decoded?;

        Ok(bytes)
    }
}

async fn forward(tx: &mpsc::Sender<Bytes>, unit: Bytes) -> Result<(), DownloadError> {
    tx.send(unit).await.map_err(|_| {
        DownloadError::Stream(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "writing stage stopped",
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{HEADER_LEN, MAGIC, UNIT_SIZE};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(TransmitStatus, u64)>>);

    impl ProgressSink for Recorder {
        fn report(&self, status: TransmitStatus, bytes: u64) {
            self.0.lock().unwrap().push((status, bytes));
        }
    }

    impl Recorder {
        fn reports(&self) -> Vec<(TransmitStatus, u64)> {
            self.0.lock().unwrap().clone()
        }
    }

    fn plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn assert_progress_well_formed(reports: &[(TransmitStatus, u64)], end: TransmitStatus) {
        let (last, rest) = reports.split_last().unwrap();
        assert_eq!(last.0, end);
        assert!(rest.iter().all(|(s, _)| *s == TransmitStatus::Transmitting));
        assert!(reports.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[tokio::test(start_paused = true)]
    async fn decrypts_stored_content_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let key = SymmetricKey::generate();
        let data = plaintext(2 * UNIT_SIZE + 12_345);

        let mut stored = MAGIC.to_vec();
        stored.resize(HEADER_LEN, 0);
        stored.extend_from_slice(&key.encrypt(&data).unwrap());

        let progress = Recorder::default();
        let written = StreamDecryptor::new(Some(key))
            .with_channel_capacity(1)
            .decrypt_to_file(&stored[..], &path, &progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, data.len() as u64);
        assert!(tokio::fs::read(&path).await.unwrap() == data);

        // Units decoded within one interval collapse into a single report
        assert_eq!(
            progress.reports(),
            vec![
                (TransmitStatus::Transmitting, UNIT_SIZE as u64),
                (TransmitStatus::Success, data.len() as u64),
            ]
        );
    }

    #[tokio::test]
    async fn plain_content_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        tokio::fs::write(&path, b"stale content that is longer").await.unwrap();

        let written = StreamDecryptor::new(None)
            .decrypt_to_file(&b"hello"[..], &path, &crate::NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn authentication_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let key = SymmetricKey::generate();
        let data = plaintext(UNIT_SIZE + 10);
        let mut stored = key.encrypt(&data).unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 0xff;

        let progress = Recorder::default();
        let err = StreamDecryptor::new(Some(key))
            .decrypt_to_file(&stored[..], &path, &progress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::DecryptionFailed { unit: 1 }));

        // The first unit was intact and stays on disk
        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert_eq!(on_disk.len(), UNIT_SIZE);

        let reports = progress.reports();
        assert_progress_well_formed(&reports, TransmitStatus::Failed);
        assert_eq!(reports.last().unwrap().1, UNIT_SIZE as u64);
    }

    #[tokio::test]
    async fn cancellation_stops_both_stages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.bin");

        // A reader that never yields
        let (_keep_open, reader) = tokio::io::duplex(64);

        let cancel = CancellationToken::new();
        let progress = Recorder::default();
        let decryptor = StreamDecryptor::new(None);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = decryptor
            .decrypt_to_file(reader, &path, &progress, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(progress.reports(), vec![(TransmitStatus::Failed, 0)]);
    }
}
