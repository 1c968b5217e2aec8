use std::ops::Range;

/// Where a synthesized slice lands in the waveform and what it blends with.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchPlan {
    /// Waveform samples to overwrite.
    pub replace: Range<usize>,
    /// Index into the synthesized slice that lines up with `replace.start`.
    pub offset: usize,
    /// Waveform contents of `replace` when the job was launched.
    pub reference: Vec<f32>,
    /// Crossfade length at each end of `replace`.
    pub fade: usize,
}

impl StitchPlan {
    /// Captures the region of `waveform` that a job will overwrite.
    pub fn capture(waveform: &[f32], replace: Range<usize>, offset: usize, max_fade: usize) -> Self {
        let end = replace.end.min(waveform.len());
        let start = replace.start.min(end);
        let fade = max_fade.min((end - start) / 2);
        Self {
            replace: start..end,
            offset,
            reference: waveform[start..end].to_vec(),
            fade,
        }
    }

    pub fn len(&self) -> usize {
        self.replace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replace.is_empty()
    }
}

/// Writes `synthesized` into `waveform` over `plan.replace`, fading in over
/// the first `fade` samples and out over the last `fade`. Blends are taken
/// against `plan.reference`, so stitching the same slice twice leaves the
/// waveform unchanged the second time. Returns the number of samples written.
pub fn stitch(waveform: &mut [f32], synthesized: &[f32], plan: &StitchPlan) -> usize {
    let total = plan.len();
    let available = synthesized.len().saturating_sub(plan.offset);
    let count = total.min(available).min(waveform.len().saturating_sub(plan.replace.start));
    let fade = plan.fade;

    for i in 0..count {
        let new = synthesized[plan.offset + i];
        let alpha = if i < fade {
            i as f32 / fade as f32
        } else if i >= total - fade {
            (total - i) as f32 / fade as f32
        } else {
            1.0
        };
        let old = plan.reference[i];
        waveform[plan.replace.start + i] = (1.0 - alpha) * old + alpha * new;
    }
    count
}
