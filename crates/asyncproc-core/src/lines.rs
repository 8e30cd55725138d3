use crate::collector::OutputCollector;
use crate::error::ProcessError;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};

/// Splits a byte stream into text lines.
///
/// Lines end at `\n`; a trailing `\r` is dropped. Invalid UTF-8 is replaced
/// rather than rejected so a misbehaving child can never stall its reader. A
/// final unterminated line is emitted at end of stream.
#[derive(Debug, Default)]
pub struct LineCodec {
    next_index: usize,
}

impl LineCodec {
    fn frame(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                let line = src.split_to(end + 1);
                Ok(Some(Self::frame(&line[..end])))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }

        self.next_index = 0;
        let rest = src.split_to(src.len());
        Ok(Some(Self::frame(&rest)))
    }
}

/// Read `io` to end of stream, appending every decoded line to `sink`.
///
/// Returns the number of lines appended.
pub async fn pump_lines<R>(io: R, sink: &OutputCollector<String>) -> Result<usize, ProcessError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::with_capacity(io, LineCodec::default(), 1024);
    let mut count = 0;

    while let Some(frame) = frames.next().await {
        sink.add(frame?)?;
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn pump(input: &[u8]) -> Vec<String> {
        let sink = OutputCollector::new();
        pump_lines(input, &sink).await.unwrap();
        sink.snapshot()
    }

    #[tokio::test]
    async fn test_splits_lines_and_strips_carriage_returns() {
        let lines = pump(b"first\r\nsecond\n\nfourth\n").await;
        assert_eq!(lines, vec!["first", "second", "", "fourth"]);
    }

    #[tokio::test]
    async fn test_emits_unterminated_tail() {
        let lines = pump(b"done\npartial").await;
        assert_eq!(lines, vec!["done", "partial"]);
        assert!(pump(b"").await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let lines = pump(b"ok\xff\xfe\n").await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok"));
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_lines_split_across_writes() {
        let (mut writer, reader) = tokio::io::duplex(8);
        let sink = OutputCollector::new();

        let pump = {
            let sink = sink.clone();
            tokio::spawn(async move { pump_lines(reader, &sink).await })
        };

        writer.write_all(b"a long line that spans ").await.unwrap();
        writer.write_all(b"several buffers\nnext").await.unwrap();
        writer.write_all(b" one\n").await.unwrap();
        drop(writer);

        assert_eq!(pump.await.unwrap().unwrap(), 2);
        assert_eq!(
            sink.snapshot(),
            vec!["a long line that spans several buffers", "next one"]
        );
    }

    #[tokio::test]
    async fn test_pump_into_completed_collector_fails() {
        let sink = OutputCollector::new();
        sink.complete();
        let err = pump_lines(&b"late\n"[..], &sink).await.unwrap_err();
        assert!(err.is_programming_error());
    }
}
