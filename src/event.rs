//! Universal MIDI Packet events.
//!
//! The router negotiates MIDI 2.0, so everything that crosses the event sink
//! is a UMP word group. Legacy byte-stream messages coming out of `midir` are
//! up-converted to MIDI-1.0-in-UMP packets (message type 0x2) without any
//! semantic transformation; native MIDI 2.0 channel voice packets (message
//! type 0x4) decode as well.

/// One Universal MIDI Packet: up to four 32-bit words.
///
/// Packets are `Copy` so they can cross the lock-free event queue without
/// allocating on the delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmpPacket {
    words: [u32; 4],
    len: u8,
}

/// Decoded channel-voice view of a packet. Anything the host does not need
/// to interpret stays `Other` and is still forwarded verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UmpMessage {
    NoteOn {
        channel: u8,
        note: u8,
        /// Normalized 0.0..=1.0 (7-bit or 16-bit source, depending on protocol).
        velocity: f32,
    },
    NoteOff {
        channel: u8,
        note: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        /// Normalized 0.0..=1.0.
        value: f32,
    },
    Other,
}

impl UmpPacket {
    /// Builds a packet from raw words. `len` is clamped to 1..=4.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        if words.is_empty() || words.len() > 4 {
            return None;
        }
        let mut buf = [0u32; 4];
        buf[..words.len()].copy_from_slice(words);
        Some(Self {
            words: buf,
            len: words.len() as u8,
        })
    }

    /// Wraps a legacy MIDI 1.0 channel-voice message into a UMP (group 0,
    /// message type 0x2). System and sysex bytes yield `None`; the router
    /// ignores them the same way the input port filters them out.
    pub fn from_midi1(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status < 0x80 || status >= 0xF0 {
            return None;
        }
        let data1 = bytes.get(1).copied().unwrap_or(0) & 0x7F;
        let data2 = bytes.get(2).copied().unwrap_or(0) & 0x7F;
        let word = 0x2000_0000
            | (u32::from(status) << 16)
            | (u32::from(data1) << 8)
            | u32::from(data2);
        Self::from_words(&[word])
    }

    /// The raw words of this packet.
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    /// UMP message type nibble of the first word.
    pub fn message_type(&self) -> u8 {
        (self.words[0] >> 28) as u8
    }

    /// Decodes the channel-voice content, if any.
    pub fn message(&self) -> UmpMessage {
        let w0 = self.words[0];
        let status = ((w0 >> 16) & 0xFF) as u8;
        let channel = status & 0x0F;
        match self.message_type() {
            // MIDI 1.0 channel voice in UMP
            0x2 => {
                let data1 = ((w0 >> 8) & 0x7F) as u8;
                let data2 = (w0 & 0x7F) as u8;
                match status & 0xF0 {
                    // Note-on with velocity 0 is a note-off in MIDI 1.0.
                    0x90 if data2 > 0 => UmpMessage::NoteOn {
                        channel,
                        note: data1,
                        velocity: f32::from(data2) / 127.0,
                    },
                    0x90 | 0x80 => UmpMessage::NoteOff {
                        channel,
                        note: data1,
                    },
                    0xB0 => UmpMessage::ControlChange {
                        channel,
                        controller: data1,
                        value: f32::from(data2) / 127.0,
                    },
                    _ => UmpMessage::Other,
                }
            }
            // MIDI 2.0 channel voice: two words, 16-bit velocity / 32-bit CC.
            0x4 if self.len >= 2 => {
                let w1 = self.words[1];
                let index = ((w0 >> 8) & 0x7F) as u8;
                match status & 0xF0 {
                    // Unlike MIDI 1.0, a 2.0 note-on with velocity 0 stays a
                    // note-on.
                    0x90 => UmpMessage::NoteOn {
                        channel,
                        note: index,
                        velocity: (w1 >> 16) as f32 / 65535.0,
                    },
                    0x80 => UmpMessage::NoteOff {
                        channel,
                        note: index,
                    },
                    0xB0 => UmpMessage::ControlChange {
                        channel,
                        controller: index,
                        value: w1 as f32 / u32::MAX as f32,
                    },
                    _ => UmpMessage::Other,
                }
            }
            _ => UmpMessage::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi1_note_on_round_trips() {
        let pkt = UmpPacket::from_midi1(&[0x90, 60, 100]).unwrap();
        assert_eq!(pkt.message_type(), 0x2);
        match pkt.message() {
            UmpMessage::NoteOn {
                channel,
                note,
                velocity,
            } => {
                assert_eq!(channel, 0);
                assert_eq!(note, 60);
                assert!((velocity - 100.0 / 127.0).abs() < 1e-6);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn midi1_note_on_zero_velocity_is_note_off() {
        let pkt = UmpPacket::from_midi1(&[0x91, 64, 0]).unwrap();
        assert_eq!(
            pkt.message(),
            UmpMessage::NoteOff {
                channel: 1,
                note: 64
            }
        );
    }

    #[test]
    fn sysex_and_realtime_bytes_are_rejected() {
        assert!(UmpPacket::from_midi1(&[0xF0, 0x7E]).is_none());
        assert!(UmpPacket::from_midi1(&[0xF8]).is_none());
        assert!(UmpPacket::from_midi1(&[]).is_none());
    }

    #[test]
    fn midi2_note_on_carries_16_bit_velocity() {
        // mt=4, group 0, note-on ch 2, note 72, velocity 0x8000
        let w0 = 0x4000_0000 | (0x92 << 16) | (72 << 8);
        let w1 = 0x8000u32 << 16; // velocity in the high half
        let pkt = UmpPacket::from_words(&[w0, w1]).unwrap();
        match pkt.message() {
            UmpMessage::NoteOn { note, velocity, .. } => {
                assert_eq!(note, 72);
                assert!((velocity - 0.5).abs() < 0.01);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn control_change_normalizes_value() {
        let pkt = UmpPacket::from_midi1(&[0xB0, 7, 127]).unwrap();
        assert_eq!(
            pkt.message(),
            UmpMessage::ControlChange {
                channel: 0,
                controller: 7,
                value: 1.0
            }
        );
    }
}
