use log::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoicingState {
    Voiced,
    Unvoiced,
}

/// Two-state Viterbi smoother over raw per-frame F0 estimates.
pub struct VoicingHmm {
    // Transition probabilities (log domain)
    log_p_vv: f32,
    log_p_vu: f32,
    log_p_uv: f32,
    log_p_uu: f32,
    f0_threshold: f32,
    median_radius: usize,
}

impl Default for VoicingHmm {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicingHmm {
    pub fn new() -> Self {
        let p_stay: f32 = 0.95;
        let p_switch: f32 = 0.05;

        Self {
            log_p_vv: p_stay.ln(),
            log_p_vu: p_switch.ln(),
            log_p_uv: p_switch.ln(),
            log_p_uu: p_stay.ln(),
            f0_threshold: 40.0,
            median_radius: 2,
        }
    }

    // A single missing frame inside a voiced run is cheaper to bridge than
    // two state switches; a single stray estimate in silence is not.
    fn emission_log_prob(&self, f0: f32, state: VoicingState) -> f32 {
        let has_pitch = f0 >= self.f0_threshold;
        match (state, has_pitch) {
            (VoicingState::Voiced, true) => -0.05,
            (VoicingState::Voiced, false) => -4.0,
            (VoicingState::Unvoiced, false) => -0.05,
            (VoicingState::Unvoiced, true) => -5.0,
        }
    }

    pub fn decode(&self, f0_raw: &[f32]) -> Vec<VoicingState> {
        let n = f0_raw.len();
        if n == 0 {
            return vec![];
        }

        let states = [VoicingState::Voiced, VoicingState::Unvoiced];

        let mut viterbi = vec![[f32::NEG_INFINITY; 2]; n];
        let mut backptr = vec![[0usize; 2]; n];

        viterbi[0][0] = (0.5_f32).ln() + self.emission_log_prob(f0_raw[0], VoicingState::Voiced);
        viterbi[0][1] = (0.5_f32).ln() + self.emission_log_prob(f0_raw[0], VoicingState::Unvoiced);

        for t in 1..n {
            for (j, &cur_state) in states.iter().enumerate() {
                let emit = self.emission_log_prob(f0_raw[t], cur_state);
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;

                for i in 0..2 {
                    let trans = match (i, j) {
                        (0, 0) => self.log_p_vv,
                        (0, _) => self.log_p_vu,
                        (_, 0) => self.log_p_uv,
                        _ => self.log_p_uu,
                    };
                    let score = viterbi[t - 1][i] + trans;
                    if score > best_score {
                        best_score = score;
                        best_prev = i;
                    }
                }

                viterbi[t][j] = best_score + emit;
                backptr[t][j] = best_prev;
            }
        }

        let mut path = vec![VoicingState::Unvoiced; n];
        let mut cur = if viterbi[n - 1][0] > viterbi[n - 1][1] { 0 } else { 1 };
        path[n - 1] = states[cur];
        for t in (0..n - 1).rev() {
            cur = backptr[t + 1][cur];
            path[t] = states[cur];
        }

        let voiced_count = path.iter().filter(|s| **s == VoicingState::Voiced).count();
        debug!("HMM V/UV: {}/{} frames voiced", voiced_count, n);

        path
    }

    /// Applies the V/UV path (bridging short dropouts by interpolation) and
    /// median-filters voiced runs to remove octave spikes.
    pub fn smooth_f0(&self, f0_raw: &[f32]) -> Vec<f32> {
        let voicing = self.decode(f0_raw);
        let n = f0_raw.len();
        let has_pitch = |v: f32| v >= self.f0_threshold;

        let f0_smooth: Vec<f32> = (0..n)
            .map(|i| match voicing[i] {
                VoicingState::Unvoiced => 0.0,
                VoicingState::Voiced if has_pitch(f0_raw[i]) => f0_raw[i],
                VoicingState::Voiced => {
                    let prev = (0..i).rev().find(|&j| has_pitch(f0_raw[j]));
                    let next = (i + 1..n).find(|&j| has_pitch(f0_raw[j]));
                    match (prev, next) {
                        (Some(p), Some(nx)) => {
                            let alpha = (i - p) as f32 / (nx - p) as f32;
                            f0_raw[p] * (1.0 - alpha) + f0_raw[nx] * alpha
                        }
                        (Some(p), None) => f0_raw[p],
                        (None, Some(nx)) => f0_raw[nx],
                        (None, None) => 0.0,
                    }
                }
            })
            .collect();

        let mut f0_median = f0_smooth.clone();
        for i in 0..n {
            if f0_smooth[i] > 0.0 {
                let start = i.saturating_sub(self.median_radius);
                let end = (i + self.median_radius + 1).min(n);
                let mut window: Vec<f32> = f0_smooth[start..end].iter().copied().filter(|&v| v > 0.0).collect();
                window.sort_by(|a, b| a.total_cmp(b));
                f0_median[i] = window[window.len() / 2];
            }
        }

        f0_median
    }
}
