//! File-backed stand-ins for a window, speakers and a keyboard.

use std::cell::RefCell;
use std::error::Error;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use pocket_emu_core::apu::SAMPLE_RATE;
use pocket_emu_core::host::{AudioOutput, EventProvider, GraphicsOutput, HostEvents};
use pocket_emu_core::ppu::{RenderedFrame, SCREEN_HEIGHT, SCREEN_WIDTH};
use pocket_emu_core::publishing::{AudioFrame, FrameSlot};

/// Keeps a copy of the most recent frame.
pub struct FrameGrabber {
    last: Rc<RefCell<Option<Box<RenderedFrame>>>>,
}

impl FrameGrabber {
    pub fn new(last: Rc<RefCell<Option<Box<RenderedFrame>>>>) -> Self {
        Self { last }
    }
}

impl GraphicsOutput for FrameGrabber {
    fn render(&mut self, frame: Option<&RenderedFrame>) {
        let Some(frame) = frame else {
            return;
        };
        let mut last = self.last.borrow_mut();
        match last.as_mut() {
            Some(copy) => copy.pixels.copy_from_slice(&frame.pixels),
            None => *last = Some(Box::new(frame.clone())),
        }
    }
}

pub fn write_png(path: &Path, frame: &RenderedFrame) -> Result<(), Box<dyn Error>> {
    create_parent(path)?;
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(file, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;

    let mut data = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 3);
    for &argb in &frame.pixels {
        data.extend_from_slice(&[(argb >> 16) as u8, (argb >> 8) as u8, argb as u8]);
    }
    writer.write_image_data(&data)?;
    writer.finish()?;
    info!("Wrote screenshot to {}", path.display());
    Ok(())
}

/// Streams every audio frame into a 16-bit stereo WAV file.
pub struct WavRecorder {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    frames: u64,
}

impl WavRecorder {
    pub fn create(path: &Path) -> Result<Self, Box<dyn Error>> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE as u32,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        create_parent(path)?;
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
            frames: 0,
        })
    }
}

impl AudioOutput for WavRecorder {
    fn play(&mut self, frame: &AudioFrame) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        for sample in &frame.samples {
            let written = writer
                .write_sample(sample.left)
                .and_then(|()| writer.write_sample(sample.right));
            if let Err(e) = written {
                warn!("Stopping WAV recording: {e}");
                self.writer = None;
                return;
            }
        }
        self.frames += 1;
    }

    fn stop_audio(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.finalize() {
                Ok(()) => info!("Wrote {} audio frames", self.frames),
                Err(e) => warn!("Failed to finish WAV file: {e}"),
            }
        }
    }
}

/// Quits after a number of emulated frames or wall-clock time, whichever
/// comes first. With no limit it runs until killed.
pub struct HeadlessEvents {
    frames: Arc<FrameSlot<RenderedFrame>>,
    frame_limit: Option<u64>,
    deadline: Option<Instant>,
}

impl HeadlessEvents {
    pub fn new(
        frames: Arc<FrameSlot<RenderedFrame>>,
        frame_limit: Option<u64>,
        time_limit: Option<Duration>,
    ) -> Self {
        Self {
            frames,
            frame_limit,
            deadline: time_limit.map(|limit| Instant::now() + limit),
        }
    }
}

impl EventProvider for HeadlessEvents {
    fn handle_events(&mut self) -> HostEvents {
        let frames_done = self
            .frame_limit
            .is_some_and(|limit| self.frames.published() >= limit);
        let time_up = self.deadline.is_some_and(|d| Instant::now() >= d);
        HostEvents {
            quit: frames_done || time_up,
            ..HostEvents::default()
        }
    }
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_emu_core::ppu::WHITE;
    use pocket_emu_core::publishing::StereoSample;
    use std::io::BufReader;
    use tempfile::tempdir;

    #[test]
    fn screenshot_is_rgb_png_of_screen_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shots").join("frame.png");
        let mut frame = RenderedFrame::default();
        frame.pixels[0] = 0xFF00_0000;
        write_png(&path, &frame).unwrap();

        let decoder = png::Decoder::new(BufReader::new(File::open(&path).unwrap()));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size().unwrap()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (160, 144));
        assert_eq!(info.color_type, png::ColorType::Rgb);
        assert_eq!(&buf[..6], &[0, 0, 0, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn grabber_keeps_latest_frame() {
        let last = Rc::new(RefCell::new(None));
        let mut grabber = FrameGrabber::new(Rc::clone(&last));
        grabber.render(None);
        assert!(last.borrow().is_none());

        let mut frame = RenderedFrame::default();
        grabber.render(Some(&frame));
        frame.pixels[5] = 0xFF55_5555;
        grabber.render(Some(&frame));
        let kept = last.borrow();
        let kept = kept.as_ref().unwrap();
        assert_eq!(kept.pixels[5], 0xFF55_5555);
        assert_eq!(kept.pixels[0], WHITE);
    }

    #[test]
    fn wav_contains_every_sample() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut recorder = WavRecorder::create(&path).unwrap();
        let mut frame = AudioFrame::default();
        frame.samples[0] = StereoSample {
            left: 1000,
            right: -1000,
        };
        recorder.play(&frame);
        recorder.play(&frame);
        recorder.stop_audio();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE as u32);
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples.len(), 2 * 2 * frame.samples.len());
        assert_eq!(&samples[..2], &[1000, -1000]);
    }

    #[test]
    fn headless_events_quit_on_frame_limit() {
        let slot = Arc::new(FrameSlot::<RenderedFrame>::new());
        let mut events = HeadlessEvents::new(Arc::clone(&slot), Some(2), None);
        assert!(!events.handle_events().quit);
        let mut private = Box::default();
        slot.publish(&mut private);
        slot.publish(&mut private);
        assert!(events.handle_events().quit);

        let mut unlimited = HeadlessEvents::new(slot, None, None);
        assert!(!unlimited.handle_events().quit);
        let mut timed = HeadlessEvents::new(
            Arc::new(FrameSlot::new()),
            None,
            Some(Duration::ZERO),
        );
        assert!(timed.handle_events().quit);
    }
}
