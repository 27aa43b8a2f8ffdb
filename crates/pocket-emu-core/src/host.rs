//! Narrow interfaces between the core and the platform it runs on.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::input::InputState;
use crate::ppu::RenderedFrame;
use crate::publishing::AudioFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFileType {
    Ram,
    Rtc,
}

/// Persistence for battery RAM and RTC state.
pub trait StorageProvider: Send + Sync {
    /// Read at most `max_size` bytes. A missing file is `Ok(None)`.
    fn load_file(&self, path: &Path, max_size: usize) -> io::Result<Option<Vec<u8>>>;

    fn save_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Where the save file of the given kind lives for a ROM loaded from `rom_path`.
    fn save_location(&self, rom_path: &Path, kind: SaveFileType) -> PathBuf {
        match kind {
            SaveFileType::Ram => rom_path.with_extension("sav"),
            SaveFileType::Rtc => rom_path.with_extension("rtc"),
        }
    }
}

/// Files next to the ROM, or inside `save_dir` when set.
#[derive(Debug, Clone, Default)]
pub struct StdStorage {
    save_dir: Option<PathBuf>,
}

impl StdStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: Some(dir.into()),
        }
    }
}

impl StorageProvider for StdStorage {
    fn load_file(&self, path: &Path, max_size: usize) -> io::Result<Option<Vec<u8>>> {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut data = Vec::new();
        file.take(max_size as u64).read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn save_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    }

    fn save_location(&self, rom_path: &Path, kind: SaveFileType) -> PathBuf {
        let ext = match kind {
            SaveFileType::Ram => "sav",
            SaveFileType::Rtc => "rtc",
        };
        match (&self.save_dir, rom_path.file_name()) {
            (Some(dir), Some(name)) => dir.join(name).with_extension(ext),
            _ => rom_path.with_extension(ext),
        }
    }
}

/// Wall-clock source for the cartridge RTC.
pub trait DateTimeProvider: Send + Sync {
    /// Seconds since the Unix epoch, with sub-second precision.
    fn now(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDateTime;

impl DateTimeProvider for SystemDateTime {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Services the emulation thread calls into.
#[derive(Clone)]
pub struct HostServices {
    pub storage: Arc<dyn StorageProvider>,
    pub datetime: Arc<dyn DateTimeProvider>,
}

impl Default for HostServices {
    fn default() -> Self {
        Self {
            storage: Arc::new(StdStorage::new()),
            datetime: Arc::new(SystemDateTime),
        }
    }
}

/// Consumer of published video frames. `None` means nothing has been
/// published yet and the screen should be blank.
pub trait GraphicsOutput {
    fn render(&mut self, frame: Option<&RenderedFrame>);
}

/// Consumer of published audio frames.
pub trait AudioOutput {
    fn play(&mut self, frame: &AudioFrame);

    fn stop_audio(&mut self) {}
}

/// What the host reported since the last poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEvents {
    pub quit: bool,
    pub input: Option<InputState>,
    /// `Some(true)` pauses, `Some(false)` resumes.
    pub pause: Option<bool>,
    /// New speed multiplier, 1.0 being real time.
    pub speed: Option<f64>,
}

pub trait EventProvider {
    fn handle_events(&mut self) -> HostEvents;
}
