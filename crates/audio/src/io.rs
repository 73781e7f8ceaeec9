use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AudioError;

/// Decoded planar samples at the container's native rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Budget checked between packets while decoding.
#[derive(Clone, Debug)]
pub struct DecodeBudget {
    started: Instant,
    limit: Option<Duration>,
    cancel: CancellationToken,
}

impl DecodeBudget {
    pub fn new(limit: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            started: Instant::now(),
            limit,
            cancel,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, CancellationToken::new())
    }

    pub fn check(&self) -> Result<(), AudioError> {
        if self.cancel.is_cancelled() {
            return Err(AudioError::Cancelled);
        }
        match self.limit {
            Some(limit) if self.started.elapsed() > limit => Err(AudioError::Timeout(limit)),
            _ => Ok(()),
        }
    }
}

pub struct AudioDecoder;

impl AudioDecoder {
    /// Reads a file and decodes it, using the extension as a format hint.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DecodedAudio, AudioError> {
        let path_ref = path.as_ref();
        let bytes = fs::read(path_ref)?;
        let hint = path_ref.extension().and_then(|ext| ext.to_str());
        Self::decode(bytes, hint, &DecodeBudget::unlimited())
    }

    /// Decodes an in-memory container. The format is probed from the bytes;
    /// `extension` only breaks ties.
    pub fn decode(
        bytes: Vec<u8>,
        extension: Option<&str>,
        budget: &DecodeBudget,
    ) -> Result<DecodedAudio, AudioError> {
        if bytes.is_empty() {
            return Err(AudioError::EmptyInput);
        }
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(AudioError::decode)?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| AudioError::decode("no default track found"))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(AudioError::decode)?;
        let mut sample_rate = track.codec_params.sample_rate;
        let declared_channels = track.codec_params.channels.map(|c| c.count());

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut interleaved: Option<SampleBuffer<f32>> = None;
        let mut skipped = 0usize;

        loop {
            budget.check()?;
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphError::ResetRequired) => break,
                Err(err) => return Err(AudioError::decode(err)),
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(buffer) => {
                    let spec = *buffer.spec();
                    let frames = buffer.frames();
                    if frames == 0 {
                        continue;
                    }
                    sample_rate.get_or_insert(spec.rate);
                    if channels.is_empty() {
                        channels = vec![Vec::new(); spec.channels.count().max(1)];
                    }
                    let needs_buffer = interleaved
                        .as_ref()
                        .map_or(true, |buf| buf.capacity() < frames);
                    if needs_buffer {
                        interleaved = Some(SampleBuffer::<f32>::new(buffer.capacity() as u64, spec));
                    }
                    if let Some(buf) = interleaved.as_mut() {
                        buf.copy_interleaved_ref(buffer);
                        let count = channels.len();
                        for (i, sample) in buf.samples().iter().enumerate() {
                            channels[i % count].push(*sample);
                        }
                    }
                }
                Err(SymphError::DecodeError(msg)) => {
                    // skip undecodable packet
                    skipped += 1;
                    debug!(msg, "skipping undecodable packet");
                }
                Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(err) => return Err(AudioError::decode(err)),
            }
        }

        let sample_rate = sample_rate
            .filter(|rate| *rate > 0)
            .ok_or_else(|| AudioError::decode("stream does not declare a sample rate"))?;
        if channels.is_empty() {
            channels = vec![Vec::new(); declared_channels.unwrap_or(1).max(1)];
        }
        if skipped > 0 {
            warn!(skipped, "some packets could not be decoded");
        }
        Ok(DecodedAudio {
            sample_rate,
            channels,
        })
    }
}
