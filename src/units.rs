//! Reference processing units.
//!
//! These are deliberately small — they exist so the host has something real
//! to discover, instantiate, wire, and drive from MIDI. Each exposes the
//! standard output-gain control.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::Arc;

use crate::component::{
    ComponentDescriptor, ComponentIdentity, ComponentRegistry,
};
use crate::error::{ComponentError, InstantiateError};
use crate::event::{UmpMessage, UmpPacket};
use crate::processor::{
    BlockLayout, ParamHandle, ParamSpec, ParameterMap, ProcessingUnit,
};

/// The default exposed control: linear output gain.
pub const OUTPUT_GAIN: ParamSpec = ParamSpec {
    id: "output-gain",
    name: "Output Gain",
    min: 0.0,
    max: 1.0,
    default: 0.25,
};

const DRIVE: ParamSpec = ParamSpec {
    id: "drive",
    name: "Drive",
    min: 1.0,
    max: 10.0,
    default: 2.5,
};

struct Voice {
    phase: f32,
    velocity: f32,
}

/// MIDI-driven additive sine instrument (`aumu`).
pub struct SineBank {
    voices: HashMap<u8, Voice>,
    gain: ParamHandle,
    params: ParameterMap,
}

impl SineBank {
    pub fn new() -> Result<Self, ComponentError> {
        let gain = ParamHandle::new(OUTPUT_GAIN);
        let params = ParameterMap::new(vec![gain.clone()])?;
        Ok(Self {
            voices: HashMap::new(),
            gain,
            params,
        })
    }
}

impl ProcessingUnit for SineBank {
    fn name(&self) -> &str {
        "Sine Bank"
    }

    fn handle_event(&mut self, packet: &UmpPacket) {
        match packet.message() {
            UmpMessage::NoteOn { note, velocity, .. } => {
                self.voices.insert(
                    note,
                    Voice {
                        phase: 0.0,
                        velocity,
                    },
                );
            }
            UmpMessage::NoteOff { note, .. } => {
                self.voices.remove(&note);
            }
            UmpMessage::ControlChange {
                controller: 7,
                value,
                ..
            } => self.gain.set(value),
            _ => {}
        }
    }

    fn render(&mut self, _input: Option<&[f32]>, output: &mut [f32], layout: BlockLayout) {
        output.fill(0.0);
        if self.voices.is_empty() || layout.sample_rate == 0 || layout.channels == 0 {
            return;
        }
        let gain = self.gain.value();
        let frames = output.len() / layout.channels;
        for (note, voice) in self.voices.iter_mut() {
            let freq = 440.0 * ((f32::from(*note) - 69.0) / 12.0).exp2();
            let step = freq / layout.sample_rate as f32;
            let mut phase = voice.phase;
            for frame in 0..frames {
                let sample = (phase * TAU).sin() * voice.velocity * gain;
                for ch in 0..layout.channels {
                    output[frame * layout.channels + ch] += sample;
                }
                phase += step;
                if phase >= 1.0 {
                    phase -= 1.0;
                }
            }
            voice.phase = phase;
        }
    }

    fn parameters(&self) -> ParameterMap {
        self.params.clone()
    }

    fn reset(&mut self) {
        self.voices.clear();
    }
}

/// Soft saturation over the source feed (`aufx`).
pub struct SoftClip {
    gain: ParamHandle,
    drive: ParamHandle,
    params: ParameterMap,
}

impl SoftClip {
    pub fn new() -> Result<Self, ComponentError> {
        let gain = ParamHandle::new(OUTPUT_GAIN);
        let drive = ParamHandle::new(DRIVE);
        let params = ParameterMap::new(vec![gain.clone(), drive.clone()])?;
        Ok(Self {
            gain,
            drive,
            params,
        })
    }
}

impl ProcessingUnit for SoftClip {
    fn name(&self) -> &str {
        "Soft Clip"
    }

    fn handle_event(&mut self, _packet: &UmpPacket) {}

    fn render(&mut self, input: Option<&[f32]>, output: &mut [f32], _layout: BlockLayout) {
        let Some(input) = input else {
            output.fill(0.0);
            return;
        };
        let gain = self.gain.value();
        let drive = self.drive.value();
        for (out, sample) in output.iter_mut().zip(input.iter()) {
            *out = (sample * drive).tanh() * gain;
        }
    }

    fn parameters(&self) -> ParameterMap {
        self.params.clone()
    }
}

/// Free-running white noise generator (`augn`).
pub struct NoiseSource {
    state: u32,
    gain: ParamHandle,
    params: ParameterMap,
}

impl NoiseSource {
    pub fn new() -> Result<Self, ComponentError> {
        let gain = ParamHandle::new(OUTPUT_GAIN);
        let params = ParameterMap::new(vec![gain.clone()])?;
        Ok(Self {
            state: 0x2545_F491,
            gain,
            params,
        })
    }

    // LCG is plenty for a test hiss.
    fn next(&mut self) -> f32 {
        self.state = self.state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.state >> 16) as f32 / 32768.0 - 1.0
    }
}

impl ProcessingUnit for NoiseSource {
    fn name(&self) -> &str {
        "Noise Source"
    }

    fn handle_event(&mut self, _packet: &UmpPacket) {}

    fn render(&mut self, _input: Option<&[f32]>, output: &mut [f32], layout: BlockLayout) {
        if layout.channels == 0 {
            return;
        }
        let gain = self.gain.value();
        let frames = output.len() / layout.channels;
        for frame in 0..frames {
            let sample = self.next() * gain * 0.5;
            for ch in 0..layout.channels {
                output[frame * layout.channels + ch] = sample;
            }
        }
    }

    fn parameters(&self) -> ParameterMap {
        self.params.clone()
    }
}

/// Registry with the bundled units registered.
pub fn builtin_registry() -> ComponentRegistry {
    let registry = ComponentRegistry::new();
    let identity = |kind, subtype| {
        ComponentIdentity::from_codes(kind, subtype, "Pbay")
            .expect("builtin identity codes are valid")
    };

    registry.register(
        ComponentDescriptor {
            identity: identity("aumu", "sine"),
            name: "Sine Bank".into(),
        },
        Arc::new(|| {
            SineBank::new()
                .map(|u| Box::new(u) as Box<dyn ProcessingUnit>)
                .map_err(|e| InstantiateError::Factory(e.to_string()))
        }),
    );
    registry.register(
        ComponentDescriptor {
            identity: identity("aufx", "clip"),
            name: "Soft Clip".into(),
        },
        Arc::new(|| {
            SoftClip::new()
                .map(|u| Box::new(u) as Box<dyn ProcessingUnit>)
                .map_err(|e| InstantiateError::Factory(e.to_string()))
        }),
    );
    registry.register(
        ComponentDescriptor {
            identity: identity("augn", "nois"),
            name: "Noise Source".into(),
        },
        Arc::new(|| {
            NoiseSource::new()
                .map(|u| Box::new(u) as Box<dyn ProcessingUnit>)
                .map_err(|e| InstantiateError::Factory(e.to_string()))
        }),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: BlockLayout = BlockLayout {
        channels: 2,
        sample_rate: 44100,
    };

    #[test]
    fn sine_bank_tracks_note_on_and_off() {
        let mut unit = SineBank::new().unwrap();
        let mut out = vec![0.0f32; 256];

        unit.render(None, &mut out, LAYOUT);
        assert!(out.iter().all(|s| *s == 0.0));

        unit.handle_event(&UmpPacket::from_midi1(&[0x90, 69, 127]).unwrap());
        unit.render(None, &mut out, LAYOUT);
        assert!(out.iter().any(|s| s.abs() > 0.01));

        unit.handle_event(&UmpPacket::from_midi1(&[0x80, 69, 0]).unwrap());
        unit.render(None, &mut out, LAYOUT);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn sine_bank_volume_cc_moves_output_gain() {
        let unit = SineBank::new().unwrap();
        let params = unit.parameters();
        let gain = params.get("output-gain").unwrap();
        assert!((gain.value() - 0.25).abs() < f32::EPSILON);

        let mut unit = unit;
        unit.handle_event(&UmpPacket::from_midi1(&[0xB0, 7, 127]).unwrap());
        assert!((params.get("output-gain").unwrap().value() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn soft_clip_applies_gain_to_the_feed() {
        let mut unit = SoftClip::new().unwrap();
        let input = vec![0.5f32; 64];
        let mut out = vec![0.0f32; 64];
        unit.render(Some(&input), &mut out, LAYOUT);
        let expected = (0.5f32 * 2.5).tanh() * 0.25;
        assert!(out.iter().all(|s| (s - expected).abs() < 1e-5));

        // With no feed an effect renders silence.
        unit.render(None, &mut out, LAYOUT);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn noise_source_is_free_running() {
        let mut unit = NoiseSource::new().unwrap();
        let mut out = vec![0.0f32; 128];
        unit.render(None, &mut out, LAYOUT);
        assert!(out.iter().any(|s| s.abs() > 0.001));
    }

    #[test]
    fn builtin_registry_lists_three_units() {
        let registry = builtin_registry();
        assert_eq!(registry.descriptors().len(), 3);
    }
}
