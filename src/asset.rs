//! The bundled test-tone asset fed through effect-style units.
//!
//! The file's native format becomes the Source node's format and the basis
//! for the `Source→Processor` / `Source→Mixer` connections.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::GraphError;
use crate::graph::StreamFormat;

/// The bundled loop. A short additive tone with fades so that looping it
/// produces no clicks.
static BUNDLED_LOOP: &[u8] = include_bytes!("../assets/loop.wav");

/// Decoded source material: interleaved f32 frames plus the native format.
#[derive(Clone)]
pub struct SourceAsset {
    pub frames: Vec<f32>,
    pub format: StreamFormat,
}

impl SourceAsset {
    /// Decodes the bundled loop.
    pub fn bundled() -> Result<Self, GraphError> {
        Self::decode(Cursor::new(BUNDLED_LOOP), Path::new("assets/loop.wav"))
    }

    /// Decodes an override file. A missing or unreadable file is a
    /// configuration error surfaced to the caller.
    pub fn from_file(path: &Path) -> Result<Self, GraphError> {
        let file = File::open(path)?;
        let asset = Self::decode(BufReader::new(file), path)?;
        info!(
            path = %path.display(),
            sample_rate = asset.format.sample_rate,
            channels = asset.format.channels,
            "loaded source asset override"
        );
        Ok(asset)
    }

    fn decode<R: Read>(reader: R, path: &Path) -> Result<Self, GraphError> {
        let mut wav = hound::WavReader::new(reader)?;
        let spec = wav.spec();

        let frames: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(GraphError::AssetDecode)?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / f32::from(1u16 << (spec.bits_per_sample.clamp(1, 16) - 1));
                if spec.bits_per_sample <= 16 {
                    wav.samples::<i16>()
                        .map(|s| s.map(|v| f32::from(v) * scale))
                        .collect::<Result<_, _>>()
                        .map_err(GraphError::AssetDecode)?
                } else {
                    let scale = 1.0 / (1u32 << (spec.bits_per_sample - 1)) as f32;
                    wav.samples::<i32>()
                        .map(|s| s.map(|v| v as f32 * scale))
                        .collect::<Result<_, _>>()
                        .map_err(GraphError::AssetDecode)?
                }
            }
        };

        if frames.is_empty() {
            return Err(GraphError::AssetEmpty {
                path: PathBuf::from(path),
            });
        }

        Ok(Self {
            frames,
            format: StreamFormat {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
            },
        })
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.frames.len() / usize::from(self.format.channels.max(1))
    }
}
