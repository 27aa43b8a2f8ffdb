use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::host::StorageProvider;

/// Quiet period after the last save request before RAM is written out.
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(20);

/// Cartridge RAM contents.
///
/// The bytes are shared copy-on-write: a snapshot handed to the persistence
/// path keeps the old contents while the emulation thread keeps writing.
#[derive(Debug, Clone, Default)]
pub struct ExternalRamBuffer {
    data: Arc<Vec<u8>>,
    modified: bool,
    write_requested_at: Option<Instant>,
}

impl ExternalRamBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: Arc::new(vec![0; size]),
            modified: false,
            write_requested_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn read(&self, pos: usize) -> u8 {
        self.data.get(pos).copied().unwrap_or(0xFF)
    }

    pub fn write(&mut self, pos: usize, val: u8) {
        if pos >= self.data.len() || self.data[pos] == val {
            return;
        }
        Arc::make_mut(&mut self.data)[pos] = val;
        self.modified = true;
    }

    /// Replace the contents with a loaded save, keeping the buffer size.
    pub fn load(&mut self, bytes: &[u8]) {
        let data = Arc::make_mut(&mut self.data);
        let n = data.len().min(bytes.len());
        data[..n].copy_from_slice(&bytes[..n]);
        self.modified = false;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
    }

    /// Cheap copy sharing the current bytes.
    pub fn snapshot(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            modified: false,
            write_requested_at: None,
        }
    }

    pub fn request_save(&mut self) {
        self.request_save_at(Instant::now());
    }

    pub fn request_save_at(&mut self, now: Instant) {
        self.write_requested_at = Some(now);
    }

    pub fn save_pending(&self) -> bool {
        self.write_requested_at.is_some()
    }

    /// Persist if a save was requested at least [`SAVE_DEBOUNCE`] ago, or
    /// immediately when `force` is set. Returns whether anything was written.
    pub fn try_save(&mut self, storage: &dyn StorageProvider, path: &Path, force: bool) -> bool {
        self.try_save_at(storage, path, force, Instant::now())
    }

    pub fn try_save_at(
        &mut self,
        storage: &dyn StorageProvider,
        path: &Path,
        force: bool,
        now: Instant,
    ) -> bool {
        let Some(requested) = self.write_requested_at else {
            return false;
        };
        if !force && now.saturating_duration_since(requested) < SAVE_DEBOUNCE {
            return false;
        }
        self.write_requested_at = None;
        match storage.save_file(path, &self.data) {
            Ok(()) => {
                debug!("Saved {} bytes of cartridge RAM to {}", self.data.len(), path.display());
                true
            }
            Err(e) => {
                warn!("Failed to save cartridge RAM to {}: {e}", path.display());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStorage {
        saved: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    impl StorageProvider for MemoryStorage {
        fn load_file(&self, _path: &Path, _max: usize) -> io::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn save_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.saved
                .lock()
                .unwrap()
                .push((path.to_path_buf(), data.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn snapshot_is_not_affected_by_later_writes() {
        let mut ram = ExternalRamBuffer::new(4);
        ram.write(0, 1);
        let snap = ram.snapshot();
        ram.write(0, 2);
        assert_eq!(snap.read(0), 1);
        assert_eq!(ram.read(0), 2);
        assert!(ram.is_modified());
        assert!(!snap.is_modified());
    }

    #[test]
    fn save_waits_for_debounce() {
        let storage = MemoryStorage::default();
        let path = Path::new("game.sav");
        let start = Instant::now();
        let mut ram = ExternalRamBuffer::new(2);
        ram.write(1, 0x55);
        ram.request_save_at(start);

        assert!(!ram.try_save_at(&storage, path, false, start + Duration::from_secs(5)));
        assert!(storage.saved.lock().unwrap().is_empty());

        assert!(ram.try_save_at(&storage, path, false, start + SAVE_DEBOUNCE));
        assert_eq!(storage.saved.lock().unwrap()[0].1, vec![0x00, 0x55]);

        // nothing pending any more
        assert!(!ram.try_save_at(&storage, path, true, start + SAVE_DEBOUNCE));
    }

    #[test]
    fn forced_save_skips_debounce() {
        let storage = MemoryStorage::default();
        let mut ram = ExternalRamBuffer::new(1);
        ram.request_save();
        assert!(ram.try_save(&storage, Path::new("x.sav"), true));
        assert_eq!(storage.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn out_of_range_access_is_open_bus() {
        let mut ram = ExternalRamBuffer::new(0);
        ram.write(3, 1);
        assert_eq!(ram.read(3), 0xFF);
        assert!(!ram.is_modified());
    }
}
