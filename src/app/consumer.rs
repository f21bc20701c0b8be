// LogTrail - app/consumer.rs
//
// The outward callback surface. A consumer (a GUI list, the CLI printer, a
// test recorder) implements `LogConsumer`; the controller calls it only from
// the thread that runs `Controller::pump`, so implementations need no locking.

use crate::core::model::{DeliveryMode, LogEntry, WatchEvent};

/// Receives everything the tailing core produces.
pub trait LogConsumer {
    /// A batch of entries for `file`, in file order.
    fn on_new_entries(&mut self, file: &str, entries: &[LogEntry], mode: DeliveryMode);

    fn on_file_discovered(&mut self, name: &str, size: u64, updated: bool);

    fn on_file_removed(&mut self, name: &str);

    fn on_loading_state_changed(&mut self, loading: bool);

    fn on_scan_state_changed(&mut self, scanning: bool);

    fn on_error(&mut self, title: &str, message: &str);

    /// A file other than the selected one changed. Ignored by default.
    fn on_file_updated(&mut self, _name: &str) {}

    /// Older growth of `name` was dropped by the incremental read ceiling.
    fn on_growth_skipped(&mut self, name: &str, skipped_bytes: u64) {
        tracing::debug!(file = name, skipped_bytes, "Growth skipped (consumer ignores)");
    }
}

/// Route one event to the matching callback.
pub fn dispatch(consumer: &mut dyn LogConsumer, event: &WatchEvent) {
    match event {
        WatchEvent::NewEntries {
            file,
            entries,
            mode,
        } => consumer.on_new_entries(file, entries, *mode),
        WatchEvent::FileDiscovered {
            name,
            size,
            updated,
        } => consumer.on_file_discovered(name, *size, *updated),
        WatchEvent::FileUpdated { name } => consumer.on_file_updated(name),
        WatchEvent::FileRemoved { name } => consumer.on_file_removed(name),
        WatchEvent::GrowthSkipped {
            name,
            skipped_bytes,
        } => consumer.on_growth_skipped(name, *skipped_bytes),
        WatchEvent::LoadingChanged(loading) => consumer.on_loading_state_changed(*loading),
        WatchEvent::ScanChanged(scanning) => consumer.on_scan_state_changed(*scanning),
        WatchEvent::Error { title, message } => consumer.on_error(title, message),
    }
}

/// Recording consumer: keeps every callback as the event it came from.
impl LogConsumer for Vec<WatchEvent> {
    fn on_new_entries(&mut self, file: &str, entries: &[LogEntry], mode: DeliveryMode) {
        self.push(WatchEvent::NewEntries {
            file: file.to_string(),
            entries: entries.to_vec(),
            mode,
        });
    }

    fn on_file_discovered(&mut self, name: &str, size: u64, updated: bool) {
        self.push(WatchEvent::FileDiscovered {
            name: name.to_string(),
            size,
            updated,
        });
    }

    fn on_file_removed(&mut self, name: &str) {
        self.push(WatchEvent::FileRemoved {
            name: name.to_string(),
        });
    }

    fn on_loading_state_changed(&mut self, loading: bool) {
        self.push(WatchEvent::LoadingChanged(loading));
    }

    fn on_scan_state_changed(&mut self, scanning: bool) {
        self.push(WatchEvent::ScanChanged(scanning));
    }

    fn on_error(&mut self, title: &str, message: &str) {
        self.push(WatchEvent::Error {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn on_file_updated(&mut self, name: &str) {
        self.push(WatchEvent::FileUpdated {
            name: name.to_string(),
        });
    }

    fn on_growth_skipped(&mut self, name: &str, skipped_bytes: u64) {
        self.push(WatchEvent::GrowthSkipped {
            name: name.to_string(),
            skipped_bytes,
        });
    }
}
