//! Patchbay CLI — run the live graph host from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use patchbay::units::builtin_registry;
use patchbay::{
    ComponentIdentity, HostConfig, InstantiateOptions, MidiRouter, MidiService, MidirBackend,
    PlayEngine, SourceAsset, StreamFormat, UnitHost,
};

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(about = "Live audio graph host with hot-swappable processing units", long_about = None)]
struct Cli {
    /// Optional TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered components
    List,

    /// Load a component into the graph and play
    Load {
        /// Component type code (aufx, aumf, aumi, aumu, augn)
        #[arg(long, default_value = "aumu")]
        kind: String,

        /// Component subtype code
        #[arg(long, default_value = "sine")]
        subtype: String,

        /// Manufacturer code
        #[arg(long, default_value = "Pbay")]
        manufacturer: String,

        /// Render offline into a WAV file instead of the audio device
        #[arg(long)]
        out: Option<PathBuf>,

        /// Seconds to play (or render, with --out)
        #[arg(short, long, default_value = "5.0")]
        duration: f32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HostConfig::from_path(path)?,
        None => HostConfig::default(),
    };

    match cli.command {
        Commands::List => {
            for descriptor in builtin_registry().descriptors() {
                println!("{}  {}", descriptor.identity, descriptor.name);
            }
        }
        Commands::Load {
            kind,
            subtype,
            manufacturer,
            out,
            duration,
        } => {
            let identity = ComponentIdentity::from_codes(&kind, &subtype, &manufacturer)?;
            let engine = if out.is_some() {
                Arc::new(PlayEngine::offline(config.offline_format()))
            } else {
                Arc::new(PlayEngine::with_default_output()?)
            };
            match &config.source_asset {
                Some(path) => engine.prepare_with(SourceAsset::from_file(path)?)?,
                None => engine.prepare()?,
            }

            // Route hardware MIDI at whichever unit ends up installed.
            let router = MidiRouter::new(MidirBackend::new("patchbay"), engine.event_sink());
            let _midi = MidiService::spawn(router, config.midi_poll_interval());

            let host = UnitHost::with_options(
                engine.clone(),
                Arc::new(builtin_registry()),
                InstantiateOptions {
                    load_out_of_process: config.load_out_of_process,
                },
            );
            let report = host.load(identity).await?;
            info!("{}", report.message);
            for param in report.surface.params.iter() {
                info!(
                    "  {} = {} [{}..{}]",
                    param.spec().id,
                    param.value(),
                    param.spec().min,
                    param.spec().max
                );
            }
            if !report.capability.is_free_running {
                engine.start_playing()?;
            }

            match out {
                Some(path) => {
                    let format = engine.output_format();
                    let frames = (duration * format.sample_rate as f32) as usize;
                    let samples = engine.render_offline(frames);
                    write_wav(&path, &samples, format)?;
                    info!("rendered {frames} frames to {}", path.display());
                }
                None => {
                    tokio::time::sleep(Duration::from_secs_f32(duration)).await;
                }
            }
            engine.stop_playing();
        }
    }
    Ok(())
}

fn write_wav(path: &Path, samples: &[f32], format: StreamFormat) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()
}
