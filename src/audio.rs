use anyhow::{Context, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// Decodes any container/codec symphonia knows into a mono buffer at the file's own rate.
/// Multi-channel input is downmixed by averaging channels.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    info!("Loading audio from {}", path.display());

    let file = File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(BufReader::new(file))), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .with_context(|| "Failed to probe audio format")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .with_context(|| "No supported audio tracks found")?;

    let track_id = track.id;
    let codec_params = &track.codec_params;
    let sample_rate = codec_params.sample_rate.unwrap_or(crate::util::SAMPLE_RATE);
    info!("Audio sample rate: {}Hz", sample_rate);

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = get_codecs()
        .make(codec_params, &dec_opts)
        .with_context(|| "Failed to create decoder")?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::ResetRequired) => {
                debug!("Decoder reset required");
                continue;
            }
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;

                if duration == 0 {
                    continue;
                }

                let channels = spec.channels.count();

                let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
                sample_buf.copy_interleaved_ref(decoded);

                if channels > 1 {
                    samples.extend(
                        sample_buf
                            .samples()
                            .chunks(channels)
                            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
                    );
                } else {
                    samples.extend_from_slice(sample_buf.samples());
                }
            }
            Err(symphonia::core::errors::Error::DecodeError(_)) => {
                debug!("Decode error encountered, skipping packet");
                continue;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => {
                debug!("Decoder reset required during decode");
                continue;
            }
            Err(e) => {
                return Err(anyhow::anyhow!("Decode error: {}", e));
            }
        }
    }

    info!("Loaded {} samples", samples.len());
    Ok((samples, sample_rate))
}

/// Loads a file and converts it to mono at `target_rate`.
pub fn load_mono<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<Vec<f32>> {
    let (samples, sample_rate) = load_audio(path)?;
    if sample_rate == target_rate {
        return Ok(samples);
    }
    debug!("Resampling {}Hz -> {}Hz", sample_rate, target_rate);
    Ok(resample_linear(&samples, sample_rate, target_rate))
}

/// Linear-interpolation sample-rate conversion.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;

    (0..out_len)
        .map(|i| {
            let src_pos = i as f64 * ratio;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a * (1.0 - frac) + b * frac,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

/// Writes 16-bit PCM mono WAV. `gain` is applied before clipping.
pub fn save_audio<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32, gain: f32) -> Result<()> {
    let path = path.as_ref();
    info!("Saving audio to {}", path.display());

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("wav");
    if !ext.eq_ignore_ascii_case("wav") {
        debug!("Unrecognised extension .{}, writing WAV anyway", ext);
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    write_wav(BufWriter::new(file), samples, sample_rate, gain)
        .with_context(|| format!("Failed to write WAV: {}", path.display()))
}

fn write_wav<W: Write>(mut out: W, samples: &[f32], sample_rate: u32, gain: f32) -> Result<()> {
    let num_channels = 1u16;
    let bits_per_sample = 16u16;
    let byte_rate = sample_rate * num_channels as u32 * (bits_per_sample / 8) as u32;
    let block_align = num_channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;

    debug!("Writing WAV: channels={}, bits={}, rate={}, size={}", num_channels, bits_per_sample, sample_rate, data_size);

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_size).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&num_channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&bits_per_sample.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&data_size.to_le_bytes())?;

    for &sample in samples {
        let clamped = (sample * gain).clamp(-1.0, 1.0);
        let int_sample = (clamped * 32767.0) as i16;
        out.write_all(&int_sample.to_le_bytes())?;
    }

    out.flush()?;
    Ok(())
}
