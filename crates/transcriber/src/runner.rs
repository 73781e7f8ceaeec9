use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use stemscore_domain::AnalysisResult;

use crate::pipeline::{TranscriptionJob, TranscriptionPipeline};
use crate::TranscriptionError;

/// Drives a pipeline from async code on a blocking worker thread.
#[derive(Clone)]
pub struct AnalysisRunner {
    pipeline: Arc<TranscriptionPipeline>,
    timeout: Option<Duration>,
}

impl AnalysisRunner {
    pub fn new(pipeline: Arc<TranscriptionPipeline>) -> Self {
        Self {
            pipeline,
            timeout: None,
        }
    }

    /// Overall wall-clock budget for one run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pipeline(&self) -> &TranscriptionPipeline {
        &self.pipeline
    }

    /// Runs `job` to completion. When the budget expires the run is cancelled
    /// and `Timeout` is returned without waiting for the worker to wind down.
    #[instrument(skip(self, job, cancel), fields(bytes = job.bytes.len()))]
    pub async fn run(
        &self,
        job: TranscriptionJob,
        cancel: CancellationToken,
    ) -> Result<AnalysisResult, TranscriptionError> {
        let pipeline = Arc::clone(&self.pipeline);
        let token = cancel.child_token();
        let worker_token = token.clone();
        let handle =
            tokio::task::spawn_blocking(move || pipeline.transcribe(job, &worker_token));

        let joined = match self.timeout {
            Some(budget) => match tokio::time::timeout(budget, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    warn!(?budget, "analysis timed out, cancelling");
                    return Err(TranscriptionError::Timeout {
                        stage: "analysis",
                        budget,
                    });
                }
            },
            None => handle.await,
        };

        let result = joined.map_err(|err| {
            TranscriptionError::Assembly(format!("analysis worker failed: {err}"))
        })??;
        info!(notes = result.note_count(), "analysis finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscriptionConfig;
    use stemscore_domain::ErrorKind;

    fn runner() -> AnalysisRunner {
        let pipeline = TranscriptionPipeline::new(TranscriptionConfig::default()).unwrap();
        AnalysisRunner::new(Arc::new(pipeline))
    }

    #[tokio::test]
    async fn surfaces_pipeline_errors() {
        let err = runner()
            .run(TranscriptionJob::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyInput);
    }

    #[tokio::test]
    async fn corrupt_bytes_fail_to_decode() {
        let job = TranscriptionJob::new(vec![7u8; 10], None);
        let err = runner()
            .with_timeout(Duration::from_secs(30))
            .run(job, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn cancelled_token_is_honoured() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = TranscriptionJob::new(vec![7u8; 10], None);
        let err = runner().run(job, cancel).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Cancelled | ErrorKind::Decode
        ));
    }

    fn tone_wav(seconds: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..seconds * 44_100 {
                let t = i as f32 / 44_100.0;
                let value = (2.0 * std::f32::consts::PI * 330.0 * t).sin() * 12_000.0;
                writer.write_sample(value as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn expired_budget_times_out() {
        let job = TranscriptionJob::new(tone_wav(20), Some("wav".into()));
        let result = runner()
            .with_timeout(Duration::from_millis(1))
            .run(job, CancellationToken::new())
            .await;
        match result {
            Err(TranscriptionError::Timeout { stage, budget }) => {
                assert_eq!(stage, "analysis");
                assert_eq!(budget, Duration::from_millis(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
