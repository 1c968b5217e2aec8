pub const SAMPLE_RATE: u32 = 44100;
pub const HOP_SIZE: usize = 512;
pub const WIN_SIZE: usize = 2048;
pub const N_FFT: usize = 2048;
pub const NUM_MELS: usize = 128;
pub const FMIN: f32 = 40.0;
pub const FMAX: f32 = 16000.0;

pub const MIDI_A4: f32 = 69.0;
pub const FREQ_A4: f32 = 440.0;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Parses a pitch given either as a MIDI number (`57`) or a note name (`A3`, `C#4`, `Eb2`).
pub fn pitch_parser(s: &str) -> Result<i32, String> {
    if s.is_empty() {
        return Err("Pitch string cannot be empty".to_string());
    }

    let s = s.trim();

    if let Ok(num) = s.parse::<i32>() {
        return Ok(num);
    }

    let mut chars = s.chars().peekable();
    let note_char = chars.next().ok_or("Invalid pitch format")?;

    let note = match note_char.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(format!("Invalid note: {}", note_char)),
    };

    let mut semitone_offset = note;
    if let Some(&next) = chars.peek() {
        match next {
            '#' => {
                chars.next();
                semitone_offset += 1;
            }
            'b' => {
                chars.next();
                semitone_offset -= 1;
            }
            _ => {}
        }
    }

    let octave_str: String = chars.collect();
    if octave_str.is_empty() {
        return Err("Octave number required".to_string());
    }

    let octave: i32 = octave_str
        .parse()
        .map_err(|_| format!("Invalid octave: {}", octave_str))?;

    Ok((octave + 1) * 12 + semitone_offset)
}

pub fn note_name(midi: f32) -> String {
    let rounded = midi.round() as i32;
    let pitch_class = rounded.rem_euclid(12) as usize;
    let octave = rounded.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

pub fn midi_to_hz(midi: f32) -> f32 {
    FREQ_A4 * 2.0_f32.powf((midi - MIDI_A4) / 12.0)
}

/// Unvoiced (non-positive) frequencies map to 0.
pub fn hz_to_midi(hz: f32) -> f32 {
    if hz <= 0.0 {
        return 0.0;
    }
    12.0 * (hz / FREQ_A4).log2() + MIDI_A4
}

pub fn semitones_to_ratio(semitones: f64) -> f64 {
    (semitones / 12.0).exp2()
}

pub fn frames_to_seconds(frames: f64, hop_size: usize, sample_rate: u32) -> f64 {
    frames * hop_size as f64 / sample_rate as f64
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}
