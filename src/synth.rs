use std::f32::consts::PI;
use std::time::Duration;

/// Length of the linear fade applied at both ends of a tone.
pub const FADE: Duration = Duration::from_millis(10);

/// A rendered mono tone.
#[derive(Clone, PartialEq, Debug)]
pub struct Tone {
    pub frequency: u32,
    pub duration: Duration,
    pub volume: f32,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Renders a sine wave with a linear fade-in and a symmetric fade-out.
///
/// Tones shorter than two fades split their length evenly between the ramps.
pub fn synthesize(frequency: u32, duration: Duration, volume: f32, sample_rate: u32) -> Tone {
    let volume = volume.clamp(0.0, 1.0);
    let sample_rate_f = sample_rate as f32;
    let total_seconds = duration.as_secs_f32();
    let fade_seconds = FADE.as_secs_f32().min(total_seconds / 2.0);
    let sample_count = (total_seconds * sample_rate_f).round() as usize;

    let samples = (0..sample_count)
        .map(|index| {
            let t = index as f32 / sample_rate_f;
            let gain = envelope(t, total_seconds, fade_seconds) * volume;
            (2.0 * PI * frequency as f32 * t).sin() * gain
        })
        .collect();

    Tone {
        frequency,
        duration,
        volume,
        sample_rate,
        samples,
    }
}

fn envelope(t: f32, total: f32, fade: f32) -> f32 {
    if fade <= 0.0 {
        return 1.0;
    }

    if t < fade {
        t / fade
    } else if t > total - fade {
        ((total - t) / fade).max(0.0)
    } else {
        1.0
    }
}
