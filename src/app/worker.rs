// LogTrail - app/worker.rs
//
// Worker pool for user-triggered page loads ("select file", "load more").
//
// Page loads run on a rayon thread pool that is separate from the watcher
// threads, so a slow page read never delays polling and polling never blocks
// navigation. Results come back over an mpsc channel and carry the
// generation number current when the load was requested; the controller
// discards results from an older generation (a previous selection).

use crate::app::reader::PagedLoader;
use crate::app::watch::TailAnchor;
use crate::core::model::{DeliveryMode, LogEntry};
use crate::util::error::ReadError;
use std::sync::{mpsc, Arc, Mutex};

/// A reader shared between the controller and the pool.
pub type SharedLoader = Arc<Mutex<Box<dyn PagedLoader>>>;

/// Outcome of one page load.
#[derive(Debug)]
pub struct PageResult {
    pub generation: u64,
    pub file: String,
    pub mode: DeliveryMode,
    pub entries: Result<Vec<LogEntry>, ReadError>,
    /// Reader state after the load.
    pub has_more: bool,
}

/// Fixed pool of named page-load threads.
pub struct PageWorkers {
    pool: rayon::ThreadPool,
    tx: mpsc::Sender<PageResult>,
    rx: mpsc::Receiver<PageResult>,
}

impl std::fmt::Debug for PageWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWorkers")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl PageWorkers {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("page-worker-{i}"))
            .build()?;
        let (tx, rx) = mpsc::channel();
        tracing::debug!(threads = pool.current_num_threads(), "Page worker pool ready");
        Ok(Self { pool, tx, rx })
    }

    /// Queue a page load. With `reset_first` the reader is rewound to the live
    /// end of file before the page is read (fresh selection or refresh), and
    /// `tail` is anchored there so tailing continues exactly where the page
    /// ends.
    pub fn submit(
        &self,
        generation: u64,
        loader: SharedLoader,
        mode: DeliveryMode,
        reset_first: bool,
        tail: Option<TailAnchor>,
    ) {
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            // A panic in another load must not wedge this reader forever.
            let mut reader = loader.lock().unwrap_or_else(|e| e.into_inner());
            let file = reader.file_name().to_string();
            let entries = if reset_first {
                reader.reset().and_then(|()| {
                    if let (Some(tail), Some(end)) = (&tail, reader.live_end()) {
                        tail.advance(end);
                    }
                    reader.load_next_page()
                })
            } else {
                reader.load_next_page()
            };
            let has_more = reader.has_more();
            drop(reader);

            if let Err(e) = &entries {
                tracing::warn!(file = %file, error = %e, "Page load failed");
            }
            // The controller may already be gone; nothing to deliver then.
            let _ = tx.send(PageResult {
                generation,
                file,
                mode,
                entries,
                has_more,
            });
        });
    }

    /// Drain finished loads without blocking.
    pub fn poll_results(&self, max: usize) -> Vec<PageResult> {
        let mut results = Vec::new();
        while results.len() < max {
            match self.rx.try_recv() {
                Ok(r) => results.push(r),
                Err(_) => break,
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::reader::LocalPagedReader;
    use crate::app::watch::Selection;
    use crate::core::codec::PlainCodec;
    use std::time::{Duration, Instant};

    #[test]
    fn test_submit_delivers_tagged_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "1\n2\n3\n").unwrap();
        let reader = LocalPagedReader::open(&path, Arc::new(PlainCodec), 2, 1024).unwrap();
        let loader: SharedLoader = Arc::new(Mutex::new(Box::new(reader)));

        let selection = Selection::default();
        selection.set(Some("a.log"));
        std::fs::write(&path, "1\n2\n3\n4\n").unwrap();

        let workers = PageWorkers::new(2).unwrap();
        workers.submit(
            7,
            Arc::clone(&loader),
            DeliveryMode::Replace,
            true,
            selection.anchor("a.log"),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.is_empty() && Instant::now() < deadline {
            results = workers.poll_results(10);
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.generation, 7);
        assert_eq!(r.file, "a.log");
        assert_eq!(r.mode, DeliveryMode::Replace);
        assert!(r.has_more);
        let messages: Vec<_> = r
            .entries
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(messages, ["3", "4"]);
        assert_eq!(selection.anchor("a.log").unwrap().tail_from(), Some(8));
    }
}
