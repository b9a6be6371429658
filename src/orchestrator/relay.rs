//! Relaying an inbound byte stream into a worker's stdin.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::AttachSession;
use crate::config::RelayConfig;
use crate::error::RelayError;

/// Bounds on a single relay.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    pub buffer_bytes: usize,
    /// Covers the copy and the session finalization.
    pub timeout: Option<Duration>,
    /// Cancelled on server shutdown.
    pub cancel: CancellationToken,
}

impl RelayPolicy {
    pub fn new(config: &RelayConfig, cancel: CancellationToken) -> Self {
        Self {
            buffer_bytes: config.buffer_bytes,
            timeout: config.timeout,
            cancel,
        }
    }
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self::new(&RelayConfig::default(), CancellationToken::new())
    }
}

/// Result of a completed relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub bytes: u64,
    pub elapsed: Duration,
}

enum Interrupt {
    Cancelled,
    Deadline,
}

async fn interrupted(cancel: &CancellationToken, deadline: Option<Instant>) -> Interrupt {
    match deadline {
        Some(deadline) => tokio::select! {
            _ = cancel.cancelled() => Interrupt::Cancelled,
            _ = tokio::time::sleep_until(deadline) => Interrupt::Deadline,
        },
        None => {
            cancel.cancelled().await;
            Interrupt::Cancelled
        }
    }
}

/// Copy `source` into `sink` until EOF, then close the sink.
///
/// Every chunk is fully written before the next read, so on error the sink
/// holds exactly the bytes that were read before it.
async fn pump<R, W>(
    source: &mut R,
    sink: &mut W,
    buf: &mut [u8],
    written: &mut u64,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        let n = source.read(buf).await.map_err(RelayError::Source)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| RelayError::Sink {
                written: *written,
                source: e,
            })?;
        *written += n as u64;
    }

    sink.shutdown().await.map_err(|e| RelayError::Sink {
        written: *written,
        source: e,
    })
}

/// Relay `source` into the session's stdin, then wait for the remote side
/// to finish.
///
/// Partial delivery is possible on any error and is not rolled back.
pub async fn relay<R>(
    source: &mut R,
    mut session: AttachSession,
    policy: &RelayPolicy,
) -> Result<RelayReport, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let started = Instant::now();
    let deadline = policy.timeout.map(|t| started + t);
    let interrupt_error = |reason: Interrupt, written: u64| match reason {
        Interrupt::Cancelled => RelayError::Cancelled { written },
        Interrupt::Deadline => RelayError::DeadlineExceeded {
            limit: policy.timeout.unwrap_or_default(),
            written,
        },
    };

    let mut sink = session.take_stdin().ok_or_else(|| RelayError::Sink {
        written: 0,
        source: std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "attach session has no stdin",
        ),
    })?;

    let mut buf = vec![0u8; policy.buffer_bytes.max(1)];
    let mut written = 0u64;
    let copied = {
        let copy = pump(source, &mut sink, &mut buf, &mut written);
        tokio::select! {
            res = copy => Ok(res),
            reason = interrupted(&policy.cancel, deadline) => Err(reason),
        }
    };
    drop(sink);

    match copied {
        Ok(res) => res?,
        Err(reason) => return Err(interrupt_error(reason, written)),
    }

    tokio::select! {
        res = session.finish() => res.map_err(RelayError::Finalize)?,
        reason = interrupted(&policy.cancel, deadline) => {
            return Err(interrupt_error(reason, written));
        }
    }

    Ok(RelayReport {
        bytes: written,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::Bytes;
    use futures::stream;
    use tokio_util::io::StreamReader;

    use super::*;
    use crate::testing::RecordingSink;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn copies_finite_stream_in_order() {
        let data = payload(10 * 1024);
        let sink = RecordingSink::new();
        let session = AttachSession::detached(sink.clone());

        let policy = RelayPolicy {
            buffer_bytes: 1000,
            ..Default::default()
        };
        let report = relay(&mut data.as_slice(), session, &policy).await.unwrap();

        assert_eq!(report.bytes, data.len() as u64);
        assert_eq!(sink.contents(), data);
        assert!(sink.is_shut_down());
    }

    #[tokio::test]
    async fn empty_source_closes_stdin() {
        let sink = RecordingSink::new();
        let session = AttachSession::detached(sink.clone());

        let report = relay(&mut tokio::io::empty(), session, &RelayPolicy::default())
            .await
            .unwrap();

        assert_eq!(report.bytes, 0);
        assert!(sink.contents().is_empty());
        assert!(sink.is_shut_down());
    }

    #[tokio::test]
    async fn source_error_keeps_bytes_already_written() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
            Ok(Bytes::from_static(b"never seen")),
        ];
        let mut source = StreamReader::new(stream::iter(chunks));
        let sink = RecordingSink::new();
        let session = AttachSession::detached(sink.clone());

        let err = relay(&mut source, session, &RelayPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Source(_)), "got: {err}");
        assert_eq!(sink.contents(), b"hello world");
        assert!(!sink.is_shut_down());
    }

    #[tokio::test]
    async fn sink_error_aborts_copy() {
        let data = payload(4096);
        let sink = RecordingSink::failing_after(1500);
        let session = AttachSession::detached(sink.clone());

        let policy = RelayPolicy {
            buffer_bytes: 1024,
            ..Default::default()
        };
        let err = relay(&mut data.as_slice(), session, &policy).await.unwrap_err();

        match err {
            RelayError::Sink { written, .. } => assert_eq!(written, 1024),
            other => panic!("expected sink error, got {other}"),
        }
        assert_eq!(sink.contents(), &data[..1500]);
    }

    #[tokio::test]
    async fn finalize_failure_is_reported() {
        let sink = RecordingSink::new();
        let session = AttachSession::new(
            Some(Box::new(sink.clone())),
            Box::pin(async { Err("remote exited with code 1".to_string()) }),
        );

        let err = relay(&mut &b"data"[..], session, &RelayPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Finalize(ref m) if m.contains("code 1")));
        assert_eq!(sink.contents(), b"data");
    }

    #[tokio::test]
    async fn cancellation_stops_a_stalled_source() {
        let (_client, mut server) = tokio::io::duplex(64);
        let sink = RecordingSink::new();
        let session = AttachSession::detached(sink.clone());
        let policy = RelayPolicy::default();
        let cancel = policy.cancel.clone();

        let handle = tokio::spawn(async move { relay(&mut server, session, &policy).await });
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::Cancelled { written: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_a_stalled_source() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"partial").await.unwrap();

        let sink = RecordingSink::new();
        let session = AttachSession::detached(sink.clone());
        let policy = RelayPolicy {
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let started = Instant::now();
        let err = relay(&mut server, session, &policy).await.unwrap_err();

        assert!(
            matches!(err, RelayError::DeadlineExceeded { written: 7, .. }),
            "got: {err}"
        );
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(sink.contents(), b"partial");
        drop(client);
    }

    #[tokio::test]
    async fn missing_stdin_is_a_sink_error() {
        let session = AttachSession::new(None, Box::pin(async { Ok(()) }));
        let err = relay(&mut &b"x"[..], session, &RelayPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Sink { written: 0, .. }));
    }
}
