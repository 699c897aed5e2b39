//! Streaming accumulation from async readers

use super::histogram::ByteHistogram;
use crate::error::{AnalysisError, Result};
use crate::models::ByteEntropyResult;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Default read chunk (1 MiB)
pub const DEFAULT_CHUNK_BYTES: usize = 1024 * 1024;

/// Read `reader` to the end in `chunk_size` pieces, adding every chunk to
/// `histogram`. Returns the number of bytes read.
pub async fn accumulate_reader<R>(
    reader: &mut R,
    histogram: &mut ByteHistogram,
    chunk_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut read_total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        histogram.update(&buf[..n]);
        read_total += n as u64;
    }

    Ok(read_total)
}

/// Analyze the concatenation of `extents`, in order, within `timeout`.
///
/// Fails with `Timeout` if reading takes longer than allowed and with
/// `EmptyBuffer` if the extents hold no bytes at all.
pub async fn analyze_extents<R>(
    extents: &mut [R],
    chunk_size: usize,
    timeout: Duration,
) -> Result<ByteEntropyResult>
where
    R: AsyncRead + Unpin,
{
    let read_all = async {
        let mut histogram = ByteHistogram::new();
        for (index, extent) in extents.iter_mut().enumerate() {
            let bytes = accumulate_reader(extent, &mut histogram, chunk_size).await?;
            debug!(extent = index, bytes = bytes, "Extent accumulated");
        }
        Ok::<_, AnalysisError>(histogram)
    };

    let histogram = tokio::time::timeout(timeout, read_all)
        .await
        .map_err(|_| AnalysisError::Timeout(timeout))??;

    histogram.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that never yields data
    struct StalledReader;

    impl AsyncRead for StalledReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_small_chunks_match_whole_buffer() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 97) as u8).collect();
        let mut reader = Cursor::new(data.clone());
        let mut histogram = ByteHistogram::new();

        let read = accumulate_reader(&mut reader, &mut histogram, 7).await.unwrap();
        assert_eq!(read, 5000);

        let mut expected = ByteHistogram::new();
        expected.update(&data);
        assert_eq!(histogram, expected);
    }

    #[tokio::test]
    async fn test_extents_are_concatenated() {
        let mut extents = vec![
            Cursor::new((0..128u8).collect::<Vec<_>>()),
            Cursor::new(Vec::new()),
            Cursor::new((128..=255u8).collect::<Vec<_>>()),
        ];

        let result = analyze_extents(&mut extents, 16, Duration::from_secs(5))
            .await
            .unwrap();
        assert!((result.byte_entropy - 8.0).abs() < 1e-9);
        assert!(result.chi_square.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_extents_signal_empty_buffer() {
        let mut extents = vec![Cursor::new(Vec::<u8>::new())];
        let result = analyze_extents(&mut extents, 16, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AnalysisError::EmptyBuffer)));
    }

    #[tokio::test]
    async fn test_stalled_read_times_out() {
        let mut extents = vec![StalledReader];
        let result = analyze_extents(&mut extents, 16, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(AnalysisError::Timeout(_))));
    }
}
