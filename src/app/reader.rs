// LogTrail - app/reader.rs
//
// Paged backward reading and forward incremental reads of local log files.
//
// Paging walks the file backward from a byte cursor toward offset 0, one
// block at a time, collecting bytes until a newline closes a line. Lines are
// decoded one at a time from their raw bytes (lossy UTF-8), so a multi-byte
// character split across two blocks is reassembled before decoding.
//
// Every page and every incremental batch is returned in file order (oldest
// line first). Empty lines are skipped; a trailing '\r' is stripped.
//
// Incremental reads only consume complete lines: an unterminated tail is left
// in place and read again, whole, once its newline has been written.
//
// Rule 11 compliance:
//   - A missing file or a directory path yields an empty page, not an error.
//   - I/O errors on an existing file propagate as `ReadError::Io`. The cursor
//     is only moved after a page has been read completely, so a failed read
//     leaves the reader exactly where it was.
//   - Incremental reads are capped (`max_incremental_read_bytes`); growth
//     beyond the cap is dropped from the oldest end and reported through
//     `NewLines::skipped_bytes`.

use crate::core::codec::{decode_line, LineCodec};
use crate::core::model::LogEntry;
use crate::util::constants::BACKWARD_READ_BLOCK_SIZE;
use crate::util::error::ReadError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// PagedLoader
// =============================================================================

/// Common contract of the local and remote backward readers.
///
/// Callers never need to know which variant they hold.
pub trait PagedLoader: Send {
    /// Name of the file being read (no directory part).
    fn file_name(&self) -> &str;

    /// Read the next older page, in file order.
    fn load_next_page(&mut self) -> Result<Vec<LogEntry>, ReadError>;

    /// True while older lines remain before the cursor.
    fn has_more(&self) -> bool;

    /// Move the cursor back to the current end of the file.
    fn reset(&mut self) -> Result<(), ReadError>;

    /// End of file as seen by the last reset (or first page): the offset where
    /// tailing takes over from paging. `None` before it is known.
    fn live_end(&self) -> Option<u64>;

    /// Release the reader. Further pages are empty.
    fn close(&mut self);
}

// =============================================================================
// Incremental reads
// =============================================================================

/// Result of a forward incremental read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewLines {
    pub entries: Vec<LogEntry>,
    /// Offset just past the last complete line consumed; the next read starts
    /// here. After a shrink it is the new file length.
    pub next_offset: u64,
    /// Bytes of growth that were not decoded because of the read ceiling.
    pub skipped_bytes: u64,
}

/// Complete lines found in a byte range read forward.
#[derive(Debug, Default)]
struct DecodedGrowth {
    entries: Vec<LogEntry>,
    /// Leading bytes discarded as the fragment of an older line.
    dropped: usize,
    /// Bytes up to and including the last newline. An unterminated tail after
    /// it is left for the next read.
    consumed: usize,
}

/// Split a byte slice into decoded entries.
///
/// When `starts_mid_line` is set the bytes up to and including the first
/// newline are a fragment of an older line and are dropped. A final line
/// without a newline is held back: the writer may still be in the middle of it.
fn decode_growth(
    codec: &dyn LineCodec,
    bytes: &[u8],
    starts_mid_line: bool,
) -> DecodedGrowth {
    let Some(last_newline) = bytes.iter().rposition(|&b| b == b'\n') else {
        return DecodedGrowth::default();
    };
    let consumed = last_newline + 1;
    let dropped = if starts_mid_line {
        bytes.iter().position(|&b| b == b'\n').map_or(0, |i| i + 1)
    } else {
        0
    };

    let entries = bytes[dropped..consumed]
        .split(|&b| b == b'\n')
        .filter_map(|raw| {
            let line = decode_raw_line(raw);
            (!line.is_empty()).then(|| decode_line(codec, &line))
        })
        .collect();
    DecodedGrowth {
        entries,
        dropped,
        consumed,
    }
}

/// Lossy-decode one raw line and strip a trailing carriage return.
pub(crate) fn decode_raw_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Where an incremental read of `[from, end)` starts once the ceiling is
/// applied.
pub(crate) fn clamp_growth(from: u64, end: u64, max_bytes: usize) -> u64 {
    if end - from > max_bytes as u64 {
        end - max_bytes as u64
    } else {
        from
    }
}

/// Turn the bytes read from `start` into a `NewLines` continuing at `from`.
pub(crate) fn finish_growth(
    codec: &dyn LineCodec,
    from: u64,
    start: u64,
    bytes: &[u8],
) -> NewLines {
    let clamped = start > from;
    let decoded = decode_growth(codec, bytes, clamped);
    if decoded.consumed == 0 {
        return NewLines {
            next_offset: from,
            ..NewLines::default()
        };
    }
    NewLines {
        entries: decoded.entries,
        next_offset: start + decoded.consumed as u64,
        skipped_bytes: if clamped {
            start - from + decoded.dropped as u64
        } else {
            0
        },
    }
}

/// Read the complete lines appended to `path` after `from`.
///
/// With `upto` set nothing at or beyond that offset is read, even if the file
/// has grown further since it was listed; that later growth belongs to the
/// next read. At most `max_bytes` of the newest growth are decoded. A missing
/// file yields nothing; a file shorter than `from` yields no entries and its
/// current length as `next_offset`.
pub fn read_new_lines(
    path: &Path,
    codec: &dyn LineCodec,
    from: u64,
    upto: Option<u64>,
    max_bytes: usize,
) -> Result<NewLines, ReadError> {
    let io_err = |operation: &'static str| {
        let path = path.to_path_buf();
        move |source: io::Error| ReadError::Io {
            path,
            operation,
            source,
        }
    };

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(NewLines::default());
        }
        Err(e) => return Err(io_err("open")(e)),
    };
    let meta = file.metadata().map_err(io_err("stat"))?;
    if meta.is_dir() {
        return Ok(NewLines::default());
    }

    let len = meta.len();
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
    file.seek(SeekFrom::Start(start)).map_err(io_err("seek"))?;
    let mut bytes = Vec::with_capacity((end - start) as usize);
    file.take(end - start)
        .read_to_end(&mut bytes)
        .map_err(io_err("read"))?;

    let new_lines = finish_growth(codec, from, start, &bytes);
    if new_lines.skipped_bytes > 0 {
        tracing::warn!(
            file = %path.display(),
            growth = end - from,
            skipped_bytes = new_lines.skipped_bytes,
            "File grew past the incremental read ceiling; older growth skipped"
        );
    }
    Ok(new_lines)
}

// =============================================================================
// LocalPagedReader
// =============================================================================

/// Backward pager over one local file.
pub struct LocalPagedReader {
    path: PathBuf,
    name: String,
    codec: Arc<dyn LineCodec>,
    page_size: usize,
    max_incremental_read_bytes: usize,
    /// Bytes at and after this offset have already been delivered.
    file_pointer: u64,
    live_end: Option<u64>,
    closed: bool,
}

impl std::fmt::Debug for LocalPagedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPagedReader")
            .field("path", &self.path)
            .field("codec", &self.codec.id())
            .field("page_size", &self.page_size)
            .field("file_pointer", &self.file_pointer)
            .finish()
    }
}

impl LocalPagedReader {
    /// Open a reader positioned at the current end of `path`.
    pub fn open(
        path: impl Into<PathBuf>,
        codec: Arc<dyn LineCodec>,
        page_size: usize,
        max_incremental_read_bytes: usize,
    ) -> Result<Self, ReadError> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut reader = Self {
            path,
            name,
            codec,
            page_size: page_size.max(1),
            max_incremental_read_bytes,
            file_pointer: 0,
            live_end: None,
            closed: false,
        };
        reader.reset()?;
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_pointer(&self) -> u64 {
        self.file_pointer
    }

    /// Forward incremental read of the complete lines appended after
    /// `previous_size`.
    pub fn load_new_lines(&self, previous_size: u64) -> Result<NewLines, ReadError> {
        read_new_lines(
            &self.path,
            self.codec.as_ref(),
            previous_size,
            None,
            self.max_incremental_read_bytes,
        )
    }

    fn io_err(&self, operation: &'static str) -> impl FnOnce(io::Error) -> ReadError + '_ {
        move |source| ReadError::Io {
            path: self.path.clone(),
            operation,
            source,
        }
    }

    /// Open the file for reading, or `None` when it is missing or a directory.
    fn open_file(&self) -> Result<Option<(File, u64)>, ReadError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err("open")(e)),
        };
        let meta = file.metadata().map_err(self.io_err("stat"))?;
        if meta.is_dir() {
            return Ok(None);
        }
        Ok(Some((file, meta.len())))
    }

    /// Scan backward from the cursor. Returns the lines (newest first) and the
    /// cursor position after them.
    fn scan_backward(&self, file: &mut File) -> Result<(Vec<String>, u64), ReadError> {
        let mut lines: Vec<String> = Vec::with_capacity(self.page_size);
        let mut line_rev: Vec<u8> = Vec::new();
        let mut block = vec![0u8; BACKWARD_READ_BLOCK_SIZE];
        let mut pos = self.file_pointer;

        while pos > 0 {
            let start = pos.saturating_sub(BACKWARD_READ_BLOCK_SIZE as u64);
            let len = (pos - start) as usize;
            file.seek(SeekFrom::Start(start))
                .map_err(self.io_err("seek"))?;
            file.read_exact(&mut block[..len])
                .map_err(self.io_err("read"))?;

            for i in (0..len).rev() {
                let byte = block[i];
                if byte != b'\n' {
                    line_rev.push(byte);
                    continue;
                }
                flush_line(&mut line_rev, &mut lines);
                if lines.len() == self.page_size {
                    // The newline belongs to the next older line.
                    return Ok((lines, start + i as u64 + 1));
                }
            }
            pos = start;
        }

        flush_line(&mut line_rev, &mut lines);
        Ok((lines, 0))
    }
}

fn flush_line(line_rev: &mut Vec<u8>, lines: &mut Vec<String>) {
    if line_rev.is_empty() {
        return;
    }
    line_rev.reverse();
    let line = decode_raw_line(line_rev);
    line_rev.clear();
    if !line.is_empty() {
        lines.push(line);
    }
}

impl PagedLoader for LocalPagedReader {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn load_next_page(&mut self) -> Result<Vec<LogEntry>, ReadError> {
        if self.closed || self.file_pointer == 0 {
            return Ok(Vec::new());
        }
        let Some((mut file, len)) = self.open_file()? else {
            tracing::debug!(file = %self.path.display(), "File missing; empty page");
            return Ok(Vec::new());
        };
        if self.file_pointer > len {
            // Truncated since the last reset: restart from the live end.
            tracing::debug!(
                file = %self.path.display(),
                cursor = self.file_pointer,
                len,
                "File shrank under the cursor; rewinding to end"
            );
            self.file_pointer = len;
        }

        let (mut lines, new_pointer) = self.scan_backward(&mut file)?;
        lines.reverse();
        let entries = lines
            .iter()
            .map(|l| decode_line(self.codec.as_ref(), l))
            .collect::<Vec<_>>();

        tracing::debug!(
            file = %self.path.display(),
            lines = entries.len(),
            from = self.file_pointer,
            to = new_pointer,
            "Loaded page"
        );
        self.file_pointer = new_pointer;
        Ok(entries)
    }

    fn has_more(&self) -> bool {
        !self.closed && self.file_pointer > 0
    }

    fn reset(&mut self) -> Result<(), ReadError> {
        self.file_pointer = match self.open_file()? {
            Some((_, len)) => len,
            None => 0,
        };
        self.live_end = Some(self.file_pointer);
        self.closed = false;
        Ok(())
    }

    fn live_end(&self) -> Option<u64> {
        self.live_end
    }

    fn close(&mut self) {
        self.closed = true;
        self.file_pointer = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::PlainCodec;
    use std::io::Write;

    fn plain() -> Arc<dyn LineCodec> {
        Arc::new(PlainCodec)
    }

    fn messages(entries: &[LogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.message.clone()).collect()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_pages_are_in_file_order_newest_page_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"1\n2\n3\n4\n5\n");
        let mut reader = LocalPagedReader::open(&path, plain(), 2, 1024).unwrap();

        assert_eq!(messages(&reader.load_next_page().unwrap()), ["4", "5"]);
        assert!(reader.has_more());
        assert_eq!(messages(&reader.load_next_page().unwrap()), ["2", "3"]);
        assert_eq!(messages(&reader.load_next_page().unwrap()), ["1"]);
        assert!(!reader.has_more());
        assert!(reader.load_next_page().unwrap().is_empty());
    }

    #[test]
    fn test_lines_spanning_blocks_and_multibyte_chars_survive() {
        let dir = tempfile::tempdir().unwrap();
        let long = "é".repeat(BACKWARD_READ_BLOCK_SIZE);
        let content = format!("first\n{long}\nlast");
        let path = write_file(&dir, "a.log", content.as_bytes());
        let mut reader = LocalPagedReader::open(&path, plain(), 10, 1024).unwrap();

        let page = reader.load_next_page().unwrap();
        assert_eq!(messages(&page), ["first".to_string(), long, "last".to_string()]);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"a\r\n\r\n\nb\r\n");
        let mut reader = LocalPagedReader::open(&path, plain(), 10, 1024).unwrap();
        assert_eq!(messages(&reader.load_next_page().unwrap()), ["a", "b"]);
    }

    #[test]
    fn test_missing_file_and_directory_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut missing =
            LocalPagedReader::open(dir.path().join("nope.log"), plain(), 10, 1024).unwrap();
        assert!(!missing.has_more());
        assert!(missing.load_next_page().unwrap().is_empty());

        let mut as_dir = LocalPagedReader::open(dir.path(), plain(), 10, 1024).unwrap();
        assert!(as_dir.load_next_page().unwrap().is_empty());
    }

    #[test]
    fn test_reset_picks_up_late_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"1\n2\n");
        let mut reader = LocalPagedReader::open(&path, plain(), 1, 1024).unwrap();
        assert_eq!(messages(&reader.load_next_page().unwrap()), ["2"]);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"3\n").unwrap();

        reader.reset().unwrap();
        assert_eq!(messages(&reader.load_next_page().unwrap()), ["3"]);
        assert_eq!(messages(&reader.load_next_page().unwrap()), ["2"]);
    }

    #[test]
    fn test_close_stops_paging() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"1\n2\n");
        let mut reader = LocalPagedReader::open(&path, plain(), 1, 1024).unwrap();
        reader.close();
        assert!(!reader.has_more());
        assert!(reader.load_next_page().unwrap().is_empty());
    }

    #[test]
    fn test_read_new_lines_returns_only_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"old\n");
        let reader = LocalPagedReader::open(&path, plain(), 10, 1024).unwrap();
        assert_eq!(reader.live_end(), Some(4));

        let none = reader.load_new_lines(4).unwrap();
        assert!(none.entries.is_empty());
        assert_eq!(none.next_offset, 4);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"n1\nn2\n").unwrap();
        let grown = reader.load_new_lines(4).unwrap();
        assert_eq!(messages(&grown.entries), ["n1", "n2"]);
        assert_eq!(grown.next_offset, 10);
        assert_eq!(grown.skipped_bytes, 0);
    }

    #[test]
    fn test_read_new_lines_clamps_to_newest_bytes() {
        let dir = tempfile::tempdir().unwrap();
        // 10 lines of 10 bytes each.
        let content: String = (0..10).map(|i| format!("line-{i:04}\n")).collect();
        let path = write_file(&dir, "a.log", content.as_bytes());

        // Ceiling of 25 bytes: the window starts mid-line inside line 7.
        let result = read_new_lines(&path, &PlainCodec, 0, None, 25).unwrap();
        assert_eq!(messages(&result.entries), ["line-0008", "line-0009"]);
        assert_eq!(result.next_offset, 100);
        assert_eq!(result.skipped_bytes, 80);
    }

    #[test]
    fn test_read_new_lines_stops_at_listed_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"x\ny\n");
        // Listed at 4 bytes, then written to before the read runs.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"z\n").unwrap();

        let first = read_new_lines(&path, &PlainCodec, 2, Some(4), 1024).unwrap();
        assert_eq!(messages(&first.entries), ["y"]);
        assert_eq!(first.next_offset, 4);

        let second = read_new_lines(&path, &PlainCodec, first.next_offset, Some(6), 1024).unwrap();
        assert_eq!(messages(&second.entries), ["z"]);
        assert_eq!(second.next_offset, 6);
    }

    #[test]
    fn test_partial_line_is_held_back_until_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"a\npar");

        let first = read_new_lines(&path, &PlainCodec, 0, None, 1024).unwrap();
        assert_eq!(messages(&first.entries), ["a"]);
        assert_eq!(first.next_offset, 2);

        let nothing = read_new_lines(&path, &PlainCodec, 2, None, 1024).unwrap();
        assert!(nothing.entries.is_empty());
        assert_eq!(nothing.next_offset, 2);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"tial\n").unwrap();
        let rest = read_new_lines(&path, &PlainCodec, 2, None, 1024).unwrap();
        assert_eq!(messages(&rest.entries), ["partial"]);
        assert_eq!(rest.next_offset, 10);
    }

    #[test]
    fn test_read_new_lines_on_shrunk_or_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.log", b"ab\n");
        let shrunk = read_new_lines(&path, &PlainCodec, 100, None, 1024).unwrap();
        assert!(shrunk.entries.is_empty());
        assert_eq!(shrunk.next_offset, 3);

        let missing = read_new_lines(&dir.path().join("x"), &PlainCodec, 5, None, 1024).unwrap();
        assert_eq!(missing, NewLines::default());
    }

    #[test]
    fn test_decode_growth_drops_head_and_holds_back_tail() {
        let decoded = decode_growth(&PlainCodec, b"tail\nfull\npart", true);
        assert_eq!(decoded.dropped, 5);
        assert_eq!(decoded.consumed, 10);
        assert_eq!(messages(&decoded.entries), ["full"]);

        let unterminated = decode_growth(&PlainCodec, b"no newline yet", false);
        assert_eq!(unterminated.consumed, 0);
        assert!(unterminated.entries.is_empty());
    }
}
