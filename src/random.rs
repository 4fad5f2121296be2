use std::cmp;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::RangeBody;

/// Every stream starts from this seed, so the payload for a given size is fixed.
const SEED: [u8; 32] = [0; 32];

/// The generator is drained in whole blocks. `fill_bytes` drops the unused
/// tail of a partially consumed word, so handing it arbitrary buffer lengths
/// would make the output depend on how the reader chunks its reads.
const BLOCK_LEN: usize = 64;

/// Deterministic pseudorandom bytes of a fixed length, generated on read.
///
/// Implements [`AsyncRead`] and a deliberately narrow [`AsyncSeek`]: only
/// `SeekFrom::Start(0)` (rewind), `SeekFrom::End(0)` (report the length) and
/// `SeekFrom::Current(0)` (report the position) are accepted. Reaching an
/// interior offset would mean regenerating and discarding every byte before
/// it, so any other seek fails with `seeking not supported`.
pub struct RandomBody {
    size: u64,
    cursor: u64,
    rng: ChaCha8Rng,
    block: [u8; BLOCK_LEN],
    block_pos: usize,
    seek_result: Option<u64>,
}

impl std::fmt::Debug for RandomBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomBody")
            .field("size", &self.size)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl RandomBody {
    /// Construct a stream producing exactly `size` bytes.
    pub fn new(size: u64) -> Self {
        RandomBody {
            size,
            cursor: 0,
            rng: ChaCha8Rng::from_seed(SEED),
            block: [0; BLOCK_LEN],
            block_pos: BLOCK_LEN,
            seek_result: None,
        }
    }

    /// Total number of bytes this stream yields.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    fn rewind(&mut self) {
        self.rng = ChaCha8Rng::from_seed(SEED);
        self.block_pos = BLOCK_LEN;
        self.cursor = 0;
    }

    fn fill(&mut self, dst: &mut [u8]) {
        let mut written = 0;

        while written < dst.len() {
            if self.block_pos == BLOCK_LEN {
                // whole blocks can bypass the staging buffer without
                // changing the byte sequence
                let direct = (dst.len() - written) / BLOCK_LEN * BLOCK_LEN;
                if direct > 0 {
                    self.rng.fill_bytes(&mut dst[written..written + direct]);
                    written += direct;
                    continue;
                }
                self.rng.fill_bytes(&mut self.block);
                self.block_pos = 0;
            }

            let n = cmp::min(BLOCK_LEN - self.block_pos, dst.len() - written);
            dst[written..written + n].copy_from_slice(&self.block[self.block_pos..self.block_pos + n]);
            self.block_pos += n;
            written += n;
        }

        self.cursor += written as u64;
    }
}

fn seeking_not_supported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "seeking not supported")
}

impl AsyncRead for RandomBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = this.size - this.cursor;
        let n = cmp::min(
            buf.remaining(),
            usize::try_from(remaining).unwrap_or(usize::MAX),
        );

        if n > 0 {
            let dst = buf.initialize_unfilled_to(n);
            this.fill(dst);
            buf.advance(n);
        }

        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for RandomBody {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let result = match position {
            SeekFrom::Start(0) => {
                this.rewind();
                0
            }
            SeekFrom::End(0) => this.size,
            SeekFrom::Current(0) => this.cursor,
            _ => return Err(seeking_not_supported()),
        };
        this.seek_result = Some(result);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        Poll::Ready(Ok(this.seek_result.take().unwrap_or(this.cursor)))
    }
}

impl RangeBody for RandomBody {
    fn byte_size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    use super::RandomBody;
    use crate::RangeBody;

    async fn read_all(mut body: RandomBody) -> Vec<u8> {
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn read_chunked(mut body: RandomBody, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = body.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_exact_length() {
        for size in [1, 63, 64, 65, 1000, 70_000] {
            let bytes = read_all(RandomBody::new(size)).await;
            assert_eq!(size as usize, bytes.len());
        }
    }

    #[tokio::test]
    async fn test_deterministic_across_instances() {
        let a = read_all(RandomBody::new(10_000)).await;
        let b = read_all(RandomBody::new(10_000)).await;
        assert_eq!(a, b);
        assert!(a.iter().any(|&byte| byte != 0));
    }

    #[tokio::test]
    async fn test_independent_of_read_size() {
        let expected = read_all(RandomBody::new(5_000)).await;
        for chunk in [1, 3, 7, 63, 64, 65, 129, 4096] {
            let got = read_chunked(RandomBody::new(5_000), chunk).await;
            assert_eq!(expected, got, "chunk size {chunk}");
        }
    }

    #[tokio::test]
    async fn test_shorter_stream_is_prefix() {
        let long = read_all(RandomBody::new(4_096)).await;
        let short = read_all(RandomBody::new(1_001)).await;
        assert_eq!(&long[..1_001], &short[..]);
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut body = RandomBody::new(10);
        let mut buf = [0u8; 32];
        assert_eq!(10, body.read(&mut buf).await.unwrap());
        assert_eq!(0, body.read(&mut buf).await.unwrap());
        assert_eq!(10, body.position());
    }

    #[tokio::test]
    async fn test_seek_end_reports_size() {
        let mut body = RandomBody::new(12_345);
        assert_eq!(12_345, body.seek(SeekFrom::End(0)).await.unwrap());
        assert_eq!(12_345, body.byte_size());
        // reporting the size does not move the read position
        assert_eq!(0, body.position());
    }

    #[tokio::test]
    async fn test_rewind_replays_bytes() {
        let mut body = RandomBody::new(300);
        let mut first = [0u8; 100];
        body.read_exact(&mut first).await.unwrap();
        assert_eq!(100, body.seek(SeekFrom::Current(0)).await.unwrap());

        assert_eq!(0, body.seek(SeekFrom::Start(0)).await.unwrap());
        let mut again = [0u8; 100];
        body.read_exact(&mut again).await.unwrap();
        assert_eq!(first, again);

        assert_eq!(300, read_all_from(&mut body).await + 100);
    }

    async fn read_all_from(body: &mut RandomBody) -> u64 {
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap() as u64
    }

    #[tokio::test]
    async fn test_interior_seek_rejected() {
        let mut body = RandomBody::new(1_000);
        for target in [SeekFrom::Start(1), SeekFrom::Start(999), SeekFrom::Current(5), SeekFrom::End(-1)] {
            let err = body.seek(target).await.unwrap_err();
            assert_eq!(std::io::ErrorKind::Unsupported, err.kind());
            assert_eq!("seeking not supported", err.to_string());
        }
    }

    #[tokio::test]
    async fn test_huge_size_reads_lazily() {
        let mut body = RandomBody::new(1 << 62);
        let mut buf = vec![0u8; 1024];
        body.read_exact(&mut buf).await.unwrap();
        assert_eq!(1024, body.position());
    }
}
