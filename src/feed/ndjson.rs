//! Newline-delimited JSON framing for the filtered stream
//!
//! The provider sends one JSON record per line and blank `\r\n` keep-alives
//! every few seconds. Chunks from the HTTP body do not respect line
//! boundaries, so bytes are buffered until a newline arrives.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use tracing::{debug, warn};

use super::FeedItem;

/// Stream records are either a bare item or wrapped as `{ "data": item, ... }`
#[derive(Deserialize)]
#[serde(untagged)]
enum StreamRecord {
    Wrapped { data: FeedItem },
    Bare(FeedItem),
}

/// Incremental line splitter and record decoder
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: BytesMut,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns every complete record it finished
    ///
    /// Lines that are not valid records are logged and dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FeedItem> {
        self.buf.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            if let Some(item) = decode_line(&line[..pos]) {
                items.push(item);
            }
        }
        items
    }

    /// Decode whatever is left once the peer closed the stream
    pub fn finish(&mut self) -> Option<FeedItem> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split_to(self.buf.remaining());
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<FeedItem> {
    let line = line.trim_ascii();
    if line.is_empty() {
        debug!("Stream keep-alive");
        return None;
    }

    match serde_json::from_slice::<StreamRecord>(line) {
        Ok(StreamRecord::Wrapped { data }) | Ok(StreamRecord::Bare(data)) if !data.id.is_empty() => {
            Some(data)
        }
        Ok(_) => {
            warn!("Dropping stream record without an id: {}", String::from_utf8_lossy(line));
            None
        }
        Err(e) => {
            warn!(
                "Dropping undecodable stream record ({}): {}",
                e,
                String::from_utf8_lossy(line)
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(br#"{"data": {"id": "1", "te"#).is_empty());
        let items = decoder.push(b"xt\": \"a\"}}\r\n{\"id\": \"2\"}\n");

        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(items[0].text, "a");
    }

    #[test]
    fn test_keep_alives_are_skipped() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"\r\n\r\n\n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_garbage_line_does_not_poison_stream() {
        let mut decoder = NdjsonDecoder::new();
        let items = decoder.push(b"not json\n{\"errors\": []}\n{\"id\": \"3\"}\n");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "3");
    }

    #[test]
    fn test_finish_flushes_unterminated_record() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(br#"{"id": "4"}"#).is_empty());
        assert_eq!(decoder.finish().map(|i| i.id), Some("4".to_string()));
        assert!(decoder.finish().is_none());
    }
}
