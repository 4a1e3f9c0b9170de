//! Render endpoints: where the wired chain gets pulled from.
//!
//! The real endpoint owns a cpal output stream on a dedicated audio thread
//! and is commanded over channels; the stream object never crosses threads.
//! `OfflineOutput` serves tests and headless rendering.

use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tracing::{error, info};

use crate::error::GraphError;
use crate::graph::{render_block, RenderChain, StreamFormat};

/// A place the render chain can be played out of.
///
/// `format()` queries the endpoint fresh each call — hardware output formats
/// can change between rewires and must never be cached across them.
pub trait OutputEndpoint: Send + Sync {
    fn format(&self) -> StreamFormat;
    fn start(&self) -> Result<(), GraphError>;
    fn stop(&self);
}

/// Fixed-format endpoint for tests and offline rendering. The chain is
/// pulled explicitly via [`crate::engine::PlayEngine::render_offline`].
pub struct OfflineOutput {
    format: StreamFormat,
}

impl OfflineOutput {
    pub fn new(format: StreamFormat) -> Self {
        Self { format }
    }
}

impl OutputEndpoint for OfflineOutput {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&self) -> Result<(), GraphError> {
        Ok(())
    }

    fn stop(&self) {}
}

enum AudioCmd {
    Play(Sender<Result<(), String>>),
    Pause,
    QueryFormat(Sender<StreamFormat>),
    Shutdown,
}

/// Default audio device endpoint. A dedicated thread owns the cpal stream;
/// control talks to it over a command channel.
pub struct CpalOutput {
    cmds: Sender<AudioCmd>,
    /// Last format the audio thread reported, used if the thread has died.
    last_format: Mutex<StreamFormat>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalOutput {
    /// Opens the default output device and builds a (paused) stream over the
    /// chain.
    pub fn spawn(chain: Arc<Mutex<RenderChain>>) -> Result<Self, GraphError> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("patchbay-audio".into())
            .spawn(move || audio_thread(chain, cmd_rx, ready_tx))
            .map_err(|e| GraphError::EngineStart(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => Ok(Self {
                cmds: cmd_tx,
                last_format: Mutex::new(format),
                handle: Mutex::new(Some(handle)),
            }),
            Ok(Err(reason)) => Err(GraphError::EngineStart(reason)),
            Err(_) => Err(GraphError::EngineStart(
                "audio thread exited before reporting a format".into(),
            )),
        }
    }
}

impl OutputEndpoint for CpalOutput {
    fn format(&self) -> StreamFormat {
        let (tx, rx) = bounded(1);
        if self.cmds.send(AudioCmd::QueryFormat(tx)).is_ok() {
            if let Ok(format) = rx.recv() {
                *self.last_format.lock().unwrap() = format;
                return format;
            }
        }
        *self.last_format.lock().unwrap()
    }

    fn start(&self) -> Result<(), GraphError> {
        let (tx, rx) = bounded(1);
        self.cmds
            .send(AudioCmd::Play(tx))
            .map_err(|_| GraphError::EngineStart("audio thread is gone".into()))?;
        match rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(GraphError::EngineStart(reason)),
            Err(_) => Err(GraphError::EngineStart("audio thread is gone".into())),
        }
    }

    fn stop(&self) {
        let _ = self.cmds.send(AudioCmd::Pause);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.cmds.send(AudioCmd::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn audio_thread(
    chain: Arc<Mutex<RenderChain>>,
    cmds: Receiver<AudioCmd>,
    ready: Sender<Result<StreamFormat, String>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no audio output device found".into()));
        return;
    };
    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(format!("no default output config: {e}")));
            return;
        }
    };
    let format = StreamFormat {
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    };
    let channels = usize::from(config.channels());

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config.into(), chain, channels)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config.into(), chain, channels)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config.into(), chain, channels)
        }
        other => Err(format!("unsupported sample format {other:?}")),
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    // Streams may auto-start on some backends; the engine decides when to run.
    let _ = stream.pause();
    info!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        "audio endpoint ready"
    );
    let _ = ready.send(Ok(format));

    while let Ok(cmd) = cmds.recv() {
        match cmd {
            AudioCmd::Play(reply) => {
                let _ = reply.send(stream.play().map_err(|e| e.to_string()));
            }
            AudioCmd::Pause => {
                let _ = stream.pause();
            }
            AudioCmd::QueryFormat(reply) => {
                // Query the device fresh; the hardware format may have
                // changed since the stream was built.
                let format = device
                    .default_output_config()
                    .map(|c| StreamFormat {
                        sample_rate: c.sample_rate().0,
                        channels: c.channels(),
                    })
                    .unwrap_or(format);
                let _ = reply.send(format);
            }
            AudioCmd::Shutdown => break,
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chain: Arc<Mutex<RenderChain>>,
    channels: usize,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch = vec![0.0f32; 8192];
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if data.len() > scratch.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let buf = &mut scratch[..data.len()];
                render_block(&chain, buf, channels);
                for (out, sample) in data.iter_mut().zip(buf.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())
}
