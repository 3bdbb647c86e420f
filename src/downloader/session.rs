use super::{progress::ProgressTracker, ProgressFn, SizePolicy};
use crate::error::DownloadError;
use futures::{Stream, StreamExt};
use std::cmp::min;
use tokio_util::sync::CancellationToken;

/// Upper bound on the up-front allocation trusted from a declared length.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// State of one in-flight download: declared length, bytes read so far, the
/// destination buffer and the last progress value reported to observers.
pub(crate) struct Session<'a> {
    total: Option<u64>,
    read: u64,
    buf: Vec<u8>,
    tracker: ProgressTracker,
    observers: &'a [ProgressFn],
    report: bool,
    policy: SizePolicy,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        total: Option<u64>,
        fallback_capacity: usize,
        observers: &'a [ProgressFn],
        policy: SizePolicy,
    ) -> Self {
        let capacity = match total {
            Some(total) => min(total, MAX_PREALLOCATION) as usize,
            None => fallback_capacity,
        };
        log::debug!("Declared length: {total:?}, allocating {capacity} bytes");
        Self {
            total,
            read: 0,
            buf: Vec::with_capacity(capacity),
            tracker: ProgressTracker::new(),
            observers,
            report: total.is_some() && !observers.is_empty(),
            policy,
        }
    }

    /// Drains `body` into the session buffer until end of stream, checking
    /// `cancel` before every read and while waiting on it.
    pub(crate) async fn read_to_end<S, B, E>(mut self, body: S, cancel: &CancellationToken) -> Result<Vec<u8>, DownloadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<DownloadError>,
    {
        let mut body = std::pin::pin!(body);
        loop {
            if cancel.is_cancelled() {
                log::warn!("Download cancelled after {} bytes", self.read);
                return Err(DownloadError::Cancelled);
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::warn!("Download cancelled while waiting on a read after {} bytes", self.read);
                    return Err(DownloadError::Cancelled);
                }
                next = body.next() => next,
            };
            match next.transpose().map_err(Into::into)? {
                Some(chunk) => self.accept(chunk.as_ref())?,
                None => break,
            }
        }
        self.finish()
    }

    fn accept(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let received = self.read + chunk.len() as u64;
        if let (SizePolicy::Strict, Some(declared)) = (self.policy, self.total) {
            if received > declared {
                log::warn!("Body exceeds declared length: {received} > {declared}");
                return Err(DownloadError::SizeMismatch { declared, received });
            }
        }
        self.buf.extend_from_slice(chunk);
        self.read = received;
        log::debug!("Read {} bytes, {} total", chunk.len(), self.read);
        if self.report {
            if let Some(total) = self.total {
                self.report_progress(self.read as f64 / total as f64 * 100.0);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, DownloadError> {
        log::debug!("End of stream after {} bytes", self.read);
        if let (SizePolicy::Strict, Some(declared)) = (self.policy, self.total) {
            if self.read != declared {
                log::warn!("Body shorter than declared length: {} < {declared}", self.read);
                return Err(DownloadError::SizeMismatch {
                    declared,
                    received: self.read,
                });
            }
        }
        // Sent even when reporting was inactive; acts as the completion signal.
        self.report_progress(100.0);
        Ok(self.buf)
    }

    fn report_progress(&mut self, percent: f64) {
        if let Some(current) = self.tracker.update(percent) {
            self.observers.iter().for_each(|observer| observer(current));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, ProgressFn) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, Arc::new(move |percent| sink.lock().unwrap().push(percent)))
    }

    fn chunks(sizes: &[usize]) -> Vec<Vec<u8>> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| vec![i as u8; size])
            .collect()
    }

    fn body(parts: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, DownloadError>> {
        stream::iter(parts.into_iter().map(Ok))
    }

    async fn run(total: Option<u64>, sizes: &[usize], policy: SizePolicy) -> (Result<Vec<u8>, DownloadError>, Vec<u8>) {
        let (events, observer) = recorder();
        let observers = [observer];
        let session = Session::new(total, 4096, &observers, policy);
        let result = session
            .read_to_end(body(chunks(sizes)), &CancellationToken::new())
            .await;
        let events = events.lock().unwrap().clone();
        (result, events)
    }

    #[tokio::test]
    async fn quarter_chunks_report_each_quarter() {
        let (result, events) = run(Some(1000), &[250, 250, 250, 250], SizePolicy::Advisory).await;
        assert_eq!(result.unwrap().len(), 1000);
        assert_eq!(events, vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn rounding_to_complete_is_reported_once() {
        let (result, events) = run(Some(1000), &[999, 1], SizePolicy::Advisory).await;
        assert_eq!(result.unwrap().len(), 1000);
        assert_eq!(events, vec![100]);
    }

    #[tokio::test]
    async fn unknown_length_only_sends_completion() {
        let (result, events) = run(None, &[500], SizePolicy::Advisory).await;
        assert_eq!(result.unwrap().len(), 500);
        assert_eq!(events, vec![100]);
    }

    #[tokio::test]
    async fn unknown_length_grows_past_fallback_capacity() {
        let (result, events) = run(None, &[4096, 4096, 10], SizePolicy::Advisory).await;
        assert_eq!(result.unwrap().len(), 8202);
        assert_eq!(events, vec![100]);
    }

    #[tokio::test]
    async fn payload_is_concatenation_of_chunks() {
        let sizes = [3, 0, 17, 1, 79];
        let expected: Vec<u8> = chunks(&sizes).concat();
        let (result, events) = run(Some(100), &sizes, SizePolicy::Advisory).await;
        assert_eq!(result.unwrap(), expected);
        assert_eq!(events.last(), Some(&100));
        assert!(events.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn short_body_is_accepted_when_advisory() {
        let (result, events) = run(Some(1000), &[400], SizePolicy::Advisory).await;
        assert_eq!(result.unwrap().len(), 400);
        assert_eq!(events, vec![40, 100]);
    }

    #[tokio::test]
    async fn long_body_is_clamped_when_advisory() {
        let (result, events) = run(Some(100), &[60, 60, 60], SizePolicy::Advisory).await;
        assert_eq!(result.unwrap().len(), 180);
        assert_eq!(events, vec![60, 100]);
    }

    #[tokio::test]
    async fn long_body_fails_when_strict() {
        let (result, events) = run(Some(100), &[60, 60], SizePolicy::Strict).await;
        assert!(matches!(
            result,
            Err(DownloadError::SizeMismatch {
                declared: 100,
                received: 120
            })
        ));
        assert_eq!(events, vec![60]);
    }

    #[tokio::test]
    async fn short_body_fails_when_strict() {
        let (result, events) = run(Some(100), &[50], SizePolicy::Strict).await;
        assert!(matches!(
            result,
            Err(DownloadError::SizeMismatch {
                declared: 100,
                received: 50
            })
        ));
        assert_eq!(events, vec![50]);
    }

    #[tokio::test]
    async fn empty_body_with_zero_length_completes() {
        let (result, events) = run(Some(0), &[], SizePolicy::Strict).await;
        assert!(result.unwrap().is_empty());
        assert_eq!(events, vec![100]);
    }

    #[tokio::test]
    async fn no_observers_still_returns_payload() {
        let session = Session::new(Some(10), 4096, &[], SizePolicy::Advisory);
        assert!(!session.report);
        let payload = session
            .read_to_end(body(chunks(&[4, 6])), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload.len(), 10);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_discards_bytes() {
        let cancel = CancellationToken::new();
        let (events, recorded) = recorder();
        let trigger = cancel.clone();
        let cancelling: ProgressFn = Arc::new(move |percent| {
            if percent >= 25 {
                trigger.cancel();
            }
        });
        let observers = [recorded, cancelling];
        let session = Session::new(Some(1000), 4096, &observers, SizePolicy::Advisory);
        let result = session
            .read_to_end(body(chunks(&[250, 250, 250, 250])), &cancel)
            .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(*events.lock().unwrap(), vec![25]);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_on_read() {
        let cancel = CancellationToken::new();
        let observers: [ProgressFn; 0] = [];
        let session = Session::new(None, 4096, &observers, SizePolicy::Advisory);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = session
            .read_to_end(stream::pending::<Result<Vec<u8>, DownloadError>>(), &cancel)
            .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[tokio::test]
    async fn body_errors_propagate() {
        let observers: [ProgressFn; 0] = [];
        let session = Session::new(Some(10), 4096, &observers, SizePolicy::Advisory);
        let failing = stream::iter(vec![Ok(vec![1u8; 5]), Err(DownloadError::URLParse)]);
        let result = session.read_to_end(failing, &CancellationToken::new()).await;
        assert!(matches!(result, Err(DownloadError::URLParse)));
    }
}
