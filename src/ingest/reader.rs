//! Frame reader thread.
//!
//! The reader opens the source on its own thread, reports the stream info
//! (or the open error) once through an init channel, then pushes frames into
//! a bounded queue. A frame that cannot be queued within the timeout is
//! dropped and counted; the reader never blocks the consumer. When the
//! stream ends the source is released and `FrameMessage::End` is sent.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, SendTimeoutError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::file::{FileSource, VideoInfo};
use crate::cancel::CancelToken;
use crate::frame::{Frame, FrameMessage};

/// Counters shared between the reader thread and the pipeline.
#[derive(Debug, Default)]
pub struct ReaderStats {
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ReaderStats {
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

pub struct ReaderHandle {
    pub info: VideoInfo,
    pub frames: Receiver<FrameMessage>,
    pub stats: Arc<ReaderStats>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Waits for the reader thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("frame reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.join();
    }
}

/// Starts the reader for `video`.
///
/// Returns once the source is open. An open failure is returned here and no
/// frames are produced.
pub fn spawn_reader(
    video: &str,
    capacity: usize,
    timeout: Duration,
    cancel: CancelToken,
) -> Result<ReaderHandle> {
    let (frame_tx, frame_rx) = crossbeam_channel::bounded(capacity.max(1));
    let (init_tx, init_rx) = crossbeam_channel::bounded::<std::result::Result<VideoInfo, String>>(1);
    let stats = Arc::new(ReaderStats::default());

    let path = video.to_string();
    let thread_stats = Arc::clone(&stats);
    let handle = thread::Builder::new()
        .name("frame-reader".to_string())
        .spawn(move || {
            let mut source = match FileSource::open(&path) {
                Ok(source) => {
                    let _ = init_tx.send(Ok(source.info()));
                    source
                }
                Err(e) => {
                    let _ = init_tx.send(Err(format!("{:#}", e)));
                    return;
                }
            };

            let mut index = 0u64;
            while !cancel.is_cancelled() {
                let image = match source.next_frame() {
                    Ok(Some(image)) => image,
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("decode error in {}: {:#}", path, e);
                        break;
                    }
                };
                index += 1;
                thread_stats.frames_read.fetch_add(1, Ordering::Relaxed);

                match frame_tx.send_timeout(FrameMessage::Frame(Frame::new(index, image)), timeout)
                {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        thread_stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log::debug!("frame queue full; dropped frame {}", index);
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return,
                }
            }

            log::info!(
                "reader finished {} after {} frames",
                path,
                source.frames_decoded()
            );
            drop(source);

            // A cancelled consumer no longer waits for End.
            while !cancel.is_cancelled() {
                match frame_tx.send_timeout(FrameMessage::End, timeout) {
                    Ok(()) | Err(SendTimeoutError::Disconnected(_)) => break,
                    Err(SendTimeoutError::Timeout(_)) => {}
                }
            }
        })
        .context("spawn frame reader thread")?;

    let info = match init_rx.recv() {
        Ok(Ok(info)) => info,
        Ok(Err(e)) => {
            let _ = handle.join();
            return Err(anyhow!(e)).with_context(|| format!("failed to open {}", video));
        }
        Err(_) => {
            let _ = handle.join();
            return Err(anyhow!("frame reader exited before opening {}", video));
        }
    };

    Ok(ReaderHandle {
        info,
        frames: frame_rx,
        stats,
        handle: Some(handle),
    })
}
