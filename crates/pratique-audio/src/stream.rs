//! Ownership of live `cpal` streams.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream is built,
//! started and dropped on a dedicated thread. The rest of the application
//! only holds a [`StreamHandle`], which is `Send` and controls that thread
//! through a channel.

use std::{
    sync::mpsc,
    thread::{self, JoinHandle},
};

use cpal::traits::StreamTrait;

use crate::device::DeviceError;

#[derive(Debug)]
enum StreamCommand {
    Pause,
    Resume,
    Stop,
}

/// Handle to a running stream. Dropping the handle stops the stream and
/// joins its owner thread.
pub struct StreamHandle {
    control: mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Pauses the stream without releasing the device.
    pub fn pause(&self) {
        let _ = self.control.send(StreamCommand::Pause);
    }

    /// Resumes a previously paused stream.
    pub fn resume(&self) {
        let _ = self.control.send(StreamCommand::Resume);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.control.send(StreamCommand::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio stream thread panicked during shutdown");
            }
        }
    }
}

/// Builds a stream on a new thread named `name`, starts it, and keeps it
/// alive until the returned handle is dropped.
///
/// The `build` closure runs on the owner thread. Errors from building or
/// starting the stream are returned to the caller synchronously.
pub fn spawn_stream_thread<F>(name: &str, build: F) -> Result<StreamHandle, DeviceError>
where
    F: FnOnce() -> Result<cpal::Stream, DeviceError> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();
    let (control_tx, control_rx) = mpsc::channel::<StreamCommand>();

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream.play()?;
                Ok(stream)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            while let Ok(command) = control_rx.recv() {
                match command {
                    StreamCommand::Pause => {
                        if let Err(err) = stream.pause() {
                            log::warn!("Failed to pause audio stream: {err}");
                        }
                    }
                    StreamCommand::Resume => {
                        if let Err(err) = stream.play() {
                            log::warn!("Failed to resume audio stream: {err}");
                        }
                    }
                    StreamCommand::Stop => break,
                }
            }
            log::debug!("Releasing audio stream");
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamHandle {
            control: control_tx,
            thread: Some(thread),
        }),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => {
            let _ = thread.join();
            Err(DeviceError::StreamThreadExited)
        }
    }
}
