// LogTrail - app/remote_reader.rs
//
// Backward paging and incremental reads of a remote file through the shared
// endpoint session.
//
// Pages are served from whole chunks (`remote_chunk_bytes`) rather than
// byte-wise backward seeks. `reset` anchors the cursor at the current file
// size; a reader that was never reset reads its first page from the tail of
// the file on a secondary channel. Every later page fetches the chunk ending
// at the cursor.
//
// Chunk boundaries: the bytes before the first newline of a chunk that does
// not start at offset 0 may be the tail of a longer line. They are never
// delivered. Instead the cursor is moved to the start of the oldest complete
// line delivered, so the next chunk ends exactly on a line boundary and the
// fragment is fetched again, whole, on the next page. A line longer than one
// chunk cannot be reassembled this way; it is delivered in chunk-sized
// fragments and logged.

use crate::app::reader::{clamp_growth, decode_raw_line, finish_growth, NewLines, PagedLoader};
use crate::core::codec::{decode_line, LineCodec};
use crate::core::model::LogEntry;
use crate::platform::remote::EndpointSession;
use crate::util::error::ReadError;
use std::sync::Arc;

/// Backward pager over one remote file.
pub struct RemotePagedReader {
    session: EndpointSession,
    /// Absolute remote path.
    path: String,
    name: String,
    codec: Arc<dyn LineCodec>,
    page_size: usize,
    chunk_bytes: usize,
    /// `None` until the first page fixes the cursor at the live end of file.
    file_pointer: Option<u64>,
    live_end: Option<u64>,
    closed: bool,
}

impl std::fmt::Debug for RemotePagedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePagedReader")
            .field("endpoint", &self.session.endpoint_id())
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("chunk_bytes", &self.chunk_bytes)
            .field("file_pointer", &self.file_pointer)
            .finish()
    }
}

/// One line inside a fetched chunk, with its absolute start offset.
struct Segment<'a> {
    offset: u64,
    bytes: &'a [u8],
}

fn split_segments(start: u64, bytes: &[u8]) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut seg_start = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            segments.push(Segment {
                offset: start + seg_start as u64,
                bytes: &bytes[seg_start..i],
            });
            seg_start = i + 1;
        }
    }
    if seg_start < bytes.len() {
        segments.push(Segment {
            offset: start + seg_start as u64,
            bytes: &bytes[seg_start..],
        });
    }
    segments
}

impl RemotePagedReader {
    pub fn new(
        session: EndpointSession,
        path: impl Into<String>,
        codec: Arc<dyn LineCodec>,
        page_size: usize,
        chunk_bytes: usize,
    ) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            session,
            path,
            name,
            codec,
            page_size: page_size.max(1),
            chunk_bytes: chunk_bytes.max(1),
            file_pointer: None,
            live_end: None,
            closed: false,
        }
    }

    pub fn file_pointer(&self) -> Option<u64> {
        self.file_pointer
    }

    /// Fetch the chunk that ends at the cursor (or the file tail on the first
    /// call). `None` means the read failed and the cursor must stay put.
    fn fetch(&self) -> Result<Option<(u64, Vec<u8>)>, ReadError> {
        match self.file_pointer {
            None => {
                let last = self.session.read_last_bytes(&self.path, self.chunk_bytes)?;
                if last.bytes.is_empty() {
                    // Either an empty file or a failed read; the size decides.
                    let size = self.session.file_size(&self.path)?;
                    if size > 0 {
                        return Ok(None);
                    }
                }
                Ok(Some((last.offset, last.bytes)))
            }
            Some(pointer) => {
                let length = self.chunk_bytes.min(usize::try_from(pointer).unwrap_or(usize::MAX));
                let start = pointer - length as u64;
                let bytes = self.session.read_chunk(&self.path, start, length)?;
                if bytes.len() != length {
                    tracing::warn!(
                        endpoint = self.session.endpoint_id(),
                        path = %self.path,
                        expected = length,
                        got = bytes.len(),
                        "Short remote chunk read; cursor kept"
                    );
                    return Ok(None);
                }
                Ok(Some((start, bytes)))
            }
        }
    }

    /// Forward incremental read of the complete lines appended after
    /// `previous_size`.
    pub fn load_new_lines(
        &self,
        previous_size: u64,
        max_bytes: usize,
    ) -> Result<NewLines, ReadError> {
        read_new_remote_lines(
            &self.session,
            &self.path,
            self.codec.as_ref(),
            previous_size,
            None,
            max_bytes,
        )
    }
}

impl PagedLoader for RemotePagedReader {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn load_next_page(&mut self) -> Result<Vec<LogEntry>, ReadError> {
        if self.closed || self.file_pointer == Some(0) {
            return Ok(Vec::new());
        }
        let Some((start, bytes)) = self.fetch()? else {
            return Ok(Vec::new());
        };
        if self.file_pointer.is_none() {
            self.live_end = Some(start + bytes.len() as u64);
        }
        if bytes.is_empty() {
            self.file_pointer = Some(0);
            return Ok(Vec::new());
        }

        let segments = split_segments(start, &bytes);
        let first_complete = usize::from(start > 0);

        // No complete line in the chunk: the line is longer than a chunk.
        if segments.len() <= first_complete {
            tracing::warn!(
                endpoint = self.session.endpoint_id(),
                path = %self.path,
                offset = start,
                chunk = bytes.len(),
                "Line longer than one remote chunk; delivering fragment"
            );
            self.file_pointer = Some(start);
            let line = decode_raw_line(bytes.strip_suffix(b"\n").unwrap_or(&bytes));
            return Ok(if line.is_empty() {
                Vec::new()
            } else {
                vec![decode_line(self.codec.as_ref(), &line)]
            });
        }

        let complete = &segments[first_complete..];
        let lines: Vec<(u64, String)> = complete
            .iter()
            .filter_map(|s| {
                let line = decode_raw_line(s.bytes);
                (!line.is_empty()).then_some((s.offset, line))
            })
            .collect();
        let keep_from = lines.len().saturating_sub(self.page_size);
        let kept = &lines[keep_from..];

        let new_pointer = kept
            .first()
            .map_or(complete[0].offset, |(offset, _)| *offset);
        let entries = kept
            .iter()
            .map(|(_, l)| decode_line(self.codec.as_ref(), l))
            .collect::<Vec<_>>();

        tracing::debug!(
            endpoint = self.session.endpoint_id(),
            path = %self.path,
            lines = entries.len(),
            chunk_start = start,
            cursor = new_pointer,
            "Loaded remote page"
        );
        self.file_pointer = Some(new_pointer);
        Ok(entries)
    }

    fn has_more(&self) -> bool {
        !self.closed && self.file_pointer != Some(0)
    }

    /// Re-anchor the cursor at the live end of file. Needs the session.
    fn reset(&mut self) -> Result<(), ReadError> {
        let size = self.session.file_size(&self.path)?;
        self.file_pointer = Some(size);
        self.live_end = Some(size);
        self.closed = false;
        Ok(())
    }

    fn live_end(&self) -> Option<u64> {
        self.live_end
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Read the complete lines appended to a remote file after `from`, stopping
/// at `upto` when given.
///
/// Same clamping and hold-back rules as the local incremental read.
pub fn read_new_remote_lines(
    session: &EndpointSession,
    path: &str,
    codec: &dyn LineCodec,
    from: u64,
    upto: Option<u64>,
    max_bytes: usize,
) -> Result<NewLines, ReadError> {
    let len = session.file_size(path)?;
    if len < from {
        return Ok(NewLines {
            next_offset: len,
            ..NewLines::default()
        });
    }
    let end = upto.map_or(len, |upto| upto.min(len));
    if end <= from {
        return Ok(NewLines {
            next_offset: from,
            ..NewLines::default()
        });
    }

    let start = clamp_growth(from, end, max_bytes);
    let length = usize::try_from(end - start).unwrap_or(usize::MAX);
    let bytes = session.read_chunk(path, start, length)?;
    if bytes.is_empty() {
        // Failed read: stay at `from` so the growth is retried.
        return Ok(NewLines {
            next_offset: from,
            ..NewLines::default()
        });
    }

    let new_lines = finish_growth(codec, from, start, &bytes);
    if new_lines.skipped_bytes > 0 {
        tracing::warn!(
            endpoint = session.endpoint_id(),
            path,
            growth = end - from,
            skipped_bytes = new_lines.skipped_bytes,
            "Remote file grew past the incremental read ceiling; older growth skipped"
        );
    }
    Ok(new_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::PlainCodec;
    use crate::platform::remote::MemoryAccessor;

    const PATH: &str = "/logs/app.log";

    fn setup(content: &[u8]) -> (Arc<MemoryAccessor>, EndpointSession) {
        let acc = Arc::new(MemoryAccessor::new("mem:22/u"));
        acc.put_file(PATH, content);
        let session = EndpointSession::new(acc.clone());
        (acc, session)
    }

    fn reader(session: &EndpointSession, page: usize, chunk: usize) -> RemotePagedReader {
        RemotePagedReader::new(session.clone(), PATH, Arc::new(PlainCodec), page, chunk)
    }

    fn messages(entries: &[LogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_single_chunk_pages() {
        let (_acc, session) = setup(b"1\n2\n3\n4\n5\n");
        let mut r = reader(&session, 2, 1024);
        assert_eq!(r.file_name(), "app.log");
        assert_eq!(messages(&r.load_next_page().unwrap()), ["4", "5"]);
        assert_eq!(messages(&r.load_next_page().unwrap()), ["2", "3"]);
        assert_eq!(messages(&r.load_next_page().unwrap()), ["1"]);
        assert!(!r.has_more());
    }

    #[test]
    fn test_chunk_boundary_never_splits_or_skips_lines() {
        // 7-byte lines with a 10-byte chunk: every chunk starts mid-line.
        let content: String = (0..9).map(|i| format!("line-{i}\n")).collect();
        let (_acc, session) = setup(content.as_bytes());
        let mut r = reader(&session, 500, 10);

        let mut pages = Vec::new();
        while r.has_more() {
            let page = r.load_next_page().unwrap();
            pages.push(messages(&page));
        }
        let forward: Vec<String> = pages.into_iter().rev().flatten().collect();
        let expected: Vec<String> = (0..9).map(|i| format!("line-{i}")).collect();
        assert_eq!(forward, expected);
    }

    /// Read every page and return them in file order.
    fn read_all(r: &mut RemotePagedReader) -> Vec<Vec<String>> {
        let mut pages = Vec::new();
        while r.has_more() {
            pages.push(messages(&r.load_next_page().unwrap()));
        }
        pages.reverse();
        pages
    }

    #[test]
    fn test_page_smaller_than_lines_in_chunk() {
        // 7-byte lines, 32-byte chunks (four complete lines each), 2 per page.
        let content: String = (0..9).map(|i| format!("line-{i}\n")).collect();
        let (_acc, session) = setup(content.as_bytes());
        let mut r = reader(&session, 2, 32);

        let pages = read_all(&mut r);
        assert!(pages.iter().all(|p| !p.is_empty() && p.len() <= 2));
        let forward: Vec<String> = pages.into_iter().flatten().collect();
        let expected: Vec<String> = (0..9).map(|i| format!("line-{i}")).collect();
        assert_eq!(forward, expected);
    }

    #[test]
    fn test_single_line_pages_with_uneven_lines_after_reset() {
        let lines: Vec<String> = (0..12).map(|i| format!("{i}{}", "-".repeat(i % 5))).collect();
        let (_acc, session) = setup((lines.join("\n") + "\n").as_bytes());
        let mut r = reader(&session, 1, 16);
        r.reset().unwrap();

        let pages = read_all(&mut r);
        assert!(pages.iter().all(|p| p.len() == 1));
        let forward: Vec<String> = pages.into_iter().flatten().collect();
        assert_eq!(forward, lines);
    }

    #[test]
    fn test_line_longer_than_chunk_is_delivered_in_fragments() {
        let (_acc, session) = setup(b"abcdefghij\nz\n");
        let mut r = reader(&session, 500, 4);

        assert_eq!(messages(&r.load_next_page().unwrap()), ["z"]);
        let mut rest = Vec::new();
        while r.has_more() {
            rest.push(messages(&r.load_next_page().unwrap()).concat());
        }
        let rebuilt: String = rest.into_iter().rev().collect();
        assert_eq!(rebuilt, "abcdefghij");
    }

    #[test]
    fn test_empty_file_has_no_pages() {
        let (_acc, session) = setup(b"");
        let mut r = reader(&session, 10, 1024);
        assert!(r.load_next_page().unwrap().is_empty());
        assert!(!r.has_more());
    }

    #[test]
    fn test_reset_reanchors_at_live_end() {
        let (acc, session) = setup(b"1\n2\n");
        let mut r = reader(&session, 1, 1024);
        assert_eq!(messages(&r.load_next_page().unwrap()), ["2"]);
        acc.append(PATH, b"3\n");
        r.reset().unwrap();
        assert_eq!(r.live_end(), Some(6));
        assert_eq!(messages(&r.load_next_page().unwrap()), ["3"]);
        assert_eq!(messages(&r.load_next_page().unwrap()), ["2"]);
    }

    #[test]
    fn test_first_page_without_reset_records_live_end() {
        let (_acc, session) = setup(b"1\n2\n");
        let mut r = reader(&session, 1, 1024);
        assert_eq!(r.live_end(), None);
        r.load_next_page().unwrap();
        assert_eq!(r.live_end(), Some(4));
    }

    #[test]
    fn test_failed_connect_is_an_error_and_keeps_cursor() {
        let (acc, session) = setup(b"1\n");
        acc.set_refuse_connections(true);
        let mut r = reader(&session, 10, 1024);
        assert!(matches!(r.load_next_page(), Err(ReadError::Remote(_))));
        assert_eq!(r.file_pointer(), None);
        assert!(r.has_more());
    }

    #[test]
    fn test_remote_new_lines() {
        let (acc, session) = setup(b"a\n");
        let none = read_new_remote_lines(&session, PATH, &PlainCodec, 2, None, 1024).unwrap();
        assert!(none.entries.is_empty());
        assert_eq!(none.next_offset, 2);

        acc.append(PATH, b"b\nc\n");
        let grown = read_new_remote_lines(&session, PATH, &PlainCodec, 2, None, 1024).unwrap();
        assert_eq!(messages(&grown.entries), ["b", "c"]);
        assert_eq!(grown.next_offset, 6);

        let clamped = read_new_remote_lines(&session, PATH, &PlainCodec, 0, None, 3).unwrap();
        assert_eq!(messages(&clamped.entries), ["c"]);
        assert_eq!(clamped.skipped_bytes, 4);
    }

    #[test]
    fn test_remote_new_lines_stop_at_listed_size_and_hold_back_partial() {
        let (acc, session) = setup(b"x\ny\n");
        acc.append(PATH, b"z\npa");

        let listed = read_new_remote_lines(&session, PATH, &PlainCodec, 2, Some(4), 1024).unwrap();
        assert_eq!(messages(&listed.entries), ["y"]);
        assert_eq!(listed.next_offset, 4);

        let rest = read_new_remote_lines(&session, PATH, &PlainCodec, 4, None, 1024).unwrap();
        assert_eq!(messages(&rest.entries), ["z"]);
        assert_eq!(rest.next_offset, 6);

        acc.append(PATH, b"rt\n");
        let done = read_new_remote_lines(&session, PATH, &PlainCodec, 6, None, 1024).unwrap();
        assert_eq!(messages(&done.entries), ["part"]);
        assert_eq!(done.next_offset, 11);
    }
}
