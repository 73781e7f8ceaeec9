use crate::AudioError;

/// Planar, immutable sample buffer shared read-only between pipeline stages.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl WaveformBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidBuffer("sample rate must be positive".into()));
        }
        let Some(first) = channels.first() else {
            return Err(AudioError::InvalidBuffer("at least one channel is required".into()));
        };
        let frames = first.len();
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(AudioError::InvalidBuffer(
                "all channels must hold the same number of samples".into(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self, AudioError> {
        Self::new(sample_rate, vec![samples])
    }

    pub fn silence(sample_rate: u32, channel_count: usize, frames: usize) -> Result<Self, AudioError> {
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Seconds, `frames / sample_rate`.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Average of all channels.
    pub fn mixdown(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.frames())
            .map(|i| self.channels.iter().map(|channel| channel[i]).sum::<f32>() * scale)
            .collect()
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|channel| channel.iter())
            .fold(0.0f32, |peak, sample| peak.max(sample.abs()))
    }

    /// Sum of squared samples over every channel.
    pub fn energy(&self) -> f64 {
        self.channels
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&sample| (sample as f64) * (sample as f64))
            .sum()
    }

    pub fn rms(&self) -> f32 {
        let count = self.frames() * self.channels.len();
        if count == 0 {
            return 0.0;
        }
        (self.energy() / count as f64).sqrt() as f32
    }

    pub fn is_silent(&self) -> bool {
        self.peak() == 0.0
    }
}
