use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::error::EmuError;
use crate::gameboy::Gameboy;
use crate::host::{AudioOutput, EventProvider, GraphicsOutput, HostEvents};

/// Sleep between host polls so a host without vsync does not spin.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Glue between a [`Gameboy`] and the host's window, speakers and input.
pub struct HostSystem {
    gameboy: Gameboy,
    graphics: Option<Box<dyn GraphicsOutput>>,
    audio: Option<Box<dyn AudioOutput>>,
    events: Option<Box<dyn EventProvider>>,
    frames_rendered: u64,
}

impl HostSystem {
    pub fn new(gameboy: Gameboy) -> Self {
        Self {
            gameboy,
            graphics: None,
            audio: None,
            events: None,
            frames_rendered: 0,
        }
    }

    pub fn with_graphics(mut self, graphics: Box<dyn GraphicsOutput>) -> Self {
        self.graphics = Some(graphics);
        self
    }

    pub fn with_audio(mut self, audio: Box<dyn AudioOutput>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_events(mut self, events: Box<dyn EventProvider>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn gameboy(&self) -> &Gameboy {
        &self.gameboy
    }

    pub fn gameboy_mut(&mut self) -> &mut Gameboy {
        &mut self.gameboy
    }

    /// Frames handed to the graphics output so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn into_gameboy(self) -> Gameboy {
        self.gameboy
    }

    /// Run until the event provider asks to quit or the emulation thread
    /// fails. The thread is stopped and saves are flushed either way.
    pub fn run(&mut self) -> Result<(), EmuError> {
        self.gameboy.run()?;
        info!("Emulation running");
        let mut result = Ok(());
        while self.handle_events() {
            if let Some(e) = self.gameboy.take_error() {
                result = Err(e);
                break;
            }
            self.render();
            self.play_audio();
            thread::sleep(POLL_INTERVAL);
        }
        self.gameboy.stop();
        // pick up whatever the thread produced before it stopped
        self.render();
        self.play_audio();
        if let Some(audio) = self.audio.as_mut() {
            audio.stop_audio();
        }
        if result.is_ok()
            && let Some(e) = self.gameboy.take_error()
        {
            result = Err(e);
        }
        debug!("Host loop finished");
        result
    }

    /// Apply one batch of host events. Returns false on quit, or when there
    /// is nothing to take events from.
    fn handle_events(&mut self) -> bool {
        let Some(events) = self.events.as_mut() else {
            return false;
        };
        let HostEvents {
            quit,
            input,
            pause,
            speed,
        } = events.handle_events();
        if let Some(state) = input {
            self.gameboy.input().set_state(state);
        }
        if let Some(pause) = pause {
            self.gameboy.toggle_pause(Some(pause));
        }
        if let Some(speed) = speed {
            let was_paused = self.gameboy.is_paused();
            self.gameboy.toggle_pause(Some(true));
            self.gameboy.set_speed_multiplier(speed);
            self.gameboy.toggle_pause(Some(was_paused));
        }
        !quit
    }

    fn render(&mut self) {
        let Some(graphics) = self.graphics.as_mut() else {
            return;
        };
        match self.gameboy.get_current_frame() {
            Some(frame) => {
                graphics.render(Some(&frame));
                self.gameboy.return_used_frame(frame);
                self.frames_rendered += 1;
            }
            None if self.frames_rendered == 0 => graphics.render(None),
            // keep showing the last frame
            None => {}
        }
    }

    fn play_audio(&mut self) {
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        let queue = self.gameboy.audio_queue();
        while let Some(frame) = queue.get_public() {
            audio.play(&frame);
            queue.return_public(frame);
        }
    }
}
