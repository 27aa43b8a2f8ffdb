//! Buffers handed from the emulation thread to the host.
//!
//! Video goes through a [`FrameSlot`]: the producer keeps a private buffer,
//! completed frames replace whatever was ready, and the consumer takes the
//! ready frame and gives it back when done. Audio goes through an
//! [`AudioQueue`], which keeps several completed frames so playback does not
//! starve. Neither side ever blocks the emulation thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

/// Stereo samples per audio frame.
pub const AUDIO_FRAME_LEN: usize = 1024;

/// Completed audio frames kept before the oldest is dropped.
pub const AUDIO_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoSample {
    pub left: i16,
    pub right: i16,
}

#[derive(Clone)]
pub struct AudioFrame {
    pub frame_no: u64,
    pub samples: [StereoSample; AUDIO_FRAME_LEN],
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self {
            frame_no: 0,
            samples: [StereoSample::default(); AUDIO_FRAME_LEN],
        }
    }
}

struct SlotState<T> {
    ready: Option<Box<T>>,
    spare: Vec<Box<T>>,
    published: u64,
    dropped: u64,
}

/// Single-frame exchange: at most one completed frame is in flight.
pub struct FrameSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T: Default> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                ready: None,
                spare: Vec::new(),
                published: 0,
                dropped: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the contents of `private` the ready frame and swap in a buffer for
    /// the next one. An unread ready frame is overwritten and recycled.
    pub fn publish(&self, private: &mut Box<T>) {
        let mut state = self.lock();
        state.published += 1;
        let next = match state.ready.take() {
            Some(old) => {
                state.dropped += 1;
                old
            }
            None => state.spare.pop().unwrap_or_default(),
        };
        state.ready = Some(std::mem::replace(private, next));
    }

    /// Take the ready frame, if one was published since the last call.
    pub fn get_public(&self) -> Option<Box<T>> {
        self.lock().ready.take()
    }

    /// Give a frame obtained from [`get_public`](Self::get_public) back.
    pub fn return_public(&self, frame: Box<T>) {
        self.lock().spare.push(frame);
    }

    /// Drop any ready frame.
    pub fn clear(&self) {
        let mut state = self.lock();
        if let Some(frame) = state.ready.take() {
            state.spare.push(frame);
        }
    }

    pub fn published(&self) -> u64 {
        self.lock().published
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

/// Bounded multi-frame exchange for audio.
pub struct AudioQueue {
    tx: Sender<Box<AudioFrame>>,
    rx: Receiver<Box<AudioFrame>>,
    recycle_tx: Sender<Box<AudioFrame>>,
    recycle_rx: Receiver<Box<AudioFrame>>,
    dropped: AtomicU64,
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(AUDIO_QUEUE_DEPTH)
    }
}

impl AudioQueue {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        let (tx, rx) = bounded(depth);
        let (recycle_tx, recycle_rx) = bounded(depth + 2);
        Self {
            tx,
            rx,
            recycle_tx,
            recycle_rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue the contents of `private` and swap in a buffer for the next
    /// frame. When the queue is full the oldest frame is discarded.
    pub fn publish(&self, private: &mut Box<AudioFrame>) {
        let spare = match self.recycle_rx.try_recv() {
            Ok(buf) => buf,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Box::default(),
        };
        let mut frame = std::mem::replace(private, spare);
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(oldest) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        self.recycle(oldest);
                    }
                    frame = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Oldest queued frame, if any.
    pub fn get_public(&self) -> Option<Box<AudioFrame>> {
        self.rx.try_recv().ok()
    }

    pub fn return_public(&self, frame: Box<AudioFrame>) {
        self.recycle(frame);
    }

    fn recycle(&self, frame: Box<AudioFrame>) {
        // a full recycle pool just frees the buffer
        let _ = self.recycle_tx.try_send(frame);
    }

    /// Discard every queued frame.
    pub fn clear(&self) {
        while let Ok(frame) = self.rx.try_recv() {
            self.recycle(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
