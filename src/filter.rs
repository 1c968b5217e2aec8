use anyhow::{anyhow, Result};
use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};

/// Zero-phase filtering: run forward, reverse, run again.
pub fn forward_backward_filter<F: Biquad<f32>>(signal: &mut [f32], filter: &mut F) {
    signal.iter_mut().for_each(|x| *x = filter.run(*x));
    filter.reset_state();
    signal.reverse();
    signal.iter_mut().for_each(|x| *x = filter.run(*x));
    filter.reset_state();
    signal.reverse();
}

pub fn make_coefficients(f_type: Type<f32>, fs: f32, freq: f32, q: f32) -> Result<Coefficients<f32>> {
    Coefficients::<f32>::from_params(f_type, fs.hz(), freq.hz(), q)
        .map_err(|_| anyhow!("Failed to create filter coefficients for {}Hz at {}Hz", freq, fs))
}

/// Removes rumble below `low_hz` and upper harmonics above `high_hz` so the
/// period search sees mostly the fundamental.
pub fn band_limit_for_pitch(samples: &mut [f32], sample_rate: u32, low_hz: f32, high_hz: f32) -> Result<()> {
    let fs = sample_rate as f32;

    let hpf_coeffs = make_coefficients(Type::HighPass, fs, low_hz, Q_BUTTERWORTH_F32)?;
    let mut hpf = DirectForm1::<f32>::new(hpf_coeffs);
    forward_backward_filter(samples, &mut hpf);

    if high_hz < fs / 2.0 {
        let lpf_coeffs = make_coefficients(Type::LowPass, fs, high_hz, Q_BUTTERWORTH_F32)?;
        let mut lpf = DirectForm1::<f32>::new(lpf_coeffs);
        forward_backward_filter(samples, &mut lpf);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_band_limit_keeps_fundamental_and_removes_dc() {
        let sr = 44100;
        let mut tone: Vec<f32> = (0..sr as usize / 2)
            .map(|i| 0.3 + 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sr as f32).sin())
            .collect();
        band_limit_for_pitch(&mut tone, sr, 50.0, 1000.0).unwrap();

        let middle = &tone[4000..18000];
        let mean = middle.iter().sum::<f32>() / middle.len() as f32;
        assert!(mean.abs() < 0.02, "dc left: {}", mean);
        assert!((rms(middle) - 0.5 / 2.0_f32.sqrt()).abs() < 0.05);
    }

    #[test]
    fn test_cutoff_above_nyquist_is_reported() {
        let mut x = vec![0.0_f32; 16];
        assert!(band_limit_for_pitch(&mut x, 44100, 30000.0, 40000.0).is_err());
    }
}
