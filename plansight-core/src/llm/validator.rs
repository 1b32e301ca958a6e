//! Batching, guarding and driving Stage-2 validation.

use futures::StreamExt as _;
use log::{info, warn};

use crate::markers::{Candidate, Marker, ProjectContext};

use super::parse::parse_response;
use super::prompt::{ExemplarSet, build_prompt};
use super::{LlmError, ValidatorClient};

/// A candidate together with its context-padded PNG crop.
#[derive(Debug, Clone)]
pub struct CandidateCrop {
    /// The candidate being validated.
    pub candidate: Candidate,
    /// PNG-encoded crop of the candidate with context padding.
    pub png: Vec<u8>,
}

/// Stage-2 tuning.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Candidates per request; 10 is the tested optimum. Larger batches
    /// degrade accuracy and smaller ones raise cost.
    pub batch_size: usize,
    /// Concurrent in-flight requests.
    pub concurrency: usize,
    /// Hard cap on the raw response body; larger responses are treated as
    /// runaway generations and the batch is dropped.
    pub max_response_bytes: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            max_response_bytes: 50_000,
        }
    }
}

/// What Stage 2 produced for one page.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// Validated markers, bboxes still tile-local.
    pub markers: Vec<Marker>,
    /// Number of batches sent.
    pub batches_total: usize,
    /// Batches that produced nothing due to transport or guard failures.
    pub batches_failed: usize,
}

/// Drives batched validation against a [`ValidatorClient`].
pub struct MarkerValidator {
    client: std::sync::Arc<dyn ValidatorClient>,
    exemplars: ExemplarSet,
    options: ValidatorOptions,
}

impl std::fmt::Debug for MarkerValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerValidator")
            .field("exemplars", &self.exemplars.count())
            .field("options", &self.options)
            .finish()
    }
}

impl MarkerValidator {
    /// Builds a validator around a client and its few-shot exemplars.
    #[must_use]
    pub fn new(
        client: std::sync::Arc<dyn ValidatorClient>,
        exemplars: ExemplarSet,
        options: ValidatorOptions,
    ) -> Self {
        Self {
            client,
            exemplars,
            options,
        }
    }

    /// Validates candidate crops in batches of `batch_size`.
    ///
    /// Batch failures are contained: a failed batch contributes no markers
    /// and increments `batches_failed`, siblings proceed. Candidate order
    /// within a batch is preserved so outputs map back positionally.
    pub async fn validate(&self, crops: Vec<CandidateCrop>, ctx: &ProjectContext) -> ValidationOutcome {
        if crops.is_empty() {
            return ValidationOutcome::default();
        }

        let batches: Vec<Vec<CandidateCrop>> = crops
            .chunks(self.options.batch_size.max(1))
            .map(<[CandidateCrop]>::to_vec)
            .collect();
        let batches_total = batches.len();
        info!(
            "stage 2: validating {} candidates in {batches_total} batches",
            batches.iter().map(Vec::len).sum::<usize>()
        );

        let results: Vec<Result<Vec<Marker>, LlmError>> = futures::stream::iter(
            batches
                .into_iter()
                .enumerate()
                .map(|(index, batch)| self.validate_one_batch(index, batch, ctx)),
        )
        .buffer_unordered(self.options.concurrency.max(1))
        .collect()
        .await;

        let mut outcome = ValidationOutcome {
            batches_total,
            ..ValidationOutcome::default()
        };
        for result in results {
            match result {
                Ok(markers) => outcome.markers.extend(markers),
                Err(e) => {
                    warn!("stage 2 batch dropped: {e}");
                    outcome.batches_failed += 1;
                }
            }
        }
        outcome
    }

    async fn validate_one_batch(
        &self,
        index: usize,
        batch: Vec<CandidateCrop>,
        ctx: &ProjectContext,
    ) -> Result<Vec<Marker>, LlmError> {
        let prompt = build_prompt(ctx, self.exemplars.count(), batch.len());
        let exemplars = self.exemplars.images();
        let crop_images: Vec<Vec<u8>> = batch.iter().map(|c| c.png.clone()).collect();

        let mut body = self
            .client
            .validate_batch(&prompt, &exemplars, &crop_images)
            .await;
        if let Err(e) = &body {
            // a single retry for transient transport failures, never more
            if e.is_transient() {
                warn!("batch {index} failed transiently ({e}), retrying once");
                body = self
                    .client
                    .validate_batch(&prompt, &exemplars, &crop_images)
                    .await;
            }
        }
        let body = body?;

        if body.len() > self.options.max_response_bytes {
            return Err(LlmError::ResponseTooLarge {
                got: body.len(),
                max: self.options.max_response_bytes,
            });
        }

        let mut pending = parse_response(&body, ctx);
        if pending.len() > batch.len() {
            warn!(
                "batch {index}: model returned {} markers for {} candidates, truncating",
                pending.len(),
                batch.len()
            );
            pending.truncate(batch.len());
        }

        // positional mapping: the prompt demands candidate order, so the
        // i-th output belongs to the i-th crop
        Ok(pending
            .into_iter()
            .zip(batch)
            .map(|(p, crop)| Marker {
                text: format!("{}/{}", p.detail, p.sheet),
                detail: p.detail,
                sheet: p.sheet,
                kind: p.kind,
                confidence: p.confidence,
                is_valid: p.is_valid,
                fuzzy_matched: p.fuzzy_matched,
                original_sheet: p.original_sheet,
                edit_distance: p.edit_distance,
                bbox: crop.candidate.bbox,
                source_tile: crop.candidate.source_tile,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::markers::{DetectionMethod, ShapeKind};
    use plansight_tile_utils::PixelRect;

    /// Scripted client: pops one canned result per call.
    struct ScriptedClient {
        responses: std::sync::Mutex<Vec<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ValidatorClient for ScriptedClient {
        async fn validate_batch(
            &self,
            _prompt: &str,
            _exemplars: &[&[u8]],
            _crops: &[Vec<u8>],
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn crop(tile: &str, x: i32) -> CandidateCrop {
        CandidateCrop {
            candidate: Candidate {
                bbox: PixelRect::new(x, 0, 40, 40),
                shape_kind: ShapeKind::Circular,
                method: DetectionMethod::HoughStandard,
                geo_confidence: 0.8,
                source_tile: tile.into(),
            },
            png: vec![0u8; 8],
        }
    }

    fn ctx() -> ProjectContext {
        ProjectContext::new(vec!["A5".into(), "A7".into()])
    }

    fn validator(client: ScriptedClient, options: ValidatorOptions) -> MarkerValidator {
        MarkerValidator::new(Arc::new(client), ExemplarSet::default(), options)
    }

    #[tokio::test]
    async fn positional_mapping_attaches_bboxes() {
        let body = r#"[{"detail":"3","sheet":"A7","type":"circular","confidence":0.9}]"#;
        let v = validator(
            ScriptedClient::new(vec![Ok(body.into())]),
            ValidatorOptions::default(),
        );
        let outcome = v.validate(vec![crop("t1", 5), crop("t1", 100)], &ctx()).await;
        assert_eq!(outcome.markers.len(), 1);
        assert_eq!(outcome.markers[0].bbox, PixelRect::new(5, 0, 40, 40));
        assert_eq!(outcome.markers[0].text, "3/A7");
        assert_eq!(outcome.batches_failed, 0);
    }

    #[tokio::test]
    async fn hallucinated_surplus_is_truncated() {
        // 50 objects for a batch of 2
        let objects: Vec<String> = (0..50)
            .map(|i| format!(r#"{{"detail":"{}","sheet":"A7"}}"#, (i % 9) + 1))
            .collect();
        let body = format!("[{}]", objects.join(","));
        let v = validator(
            ScriptedClient::new(vec![Ok(body)]),
            ValidatorOptions::default(),
        );
        let outcome = v.validate(vec![crop("t", 0), crop("t", 100)], &ctx()).await;
        assert_eq!(outcome.markers.len(), 2);
    }

    #[tokio::test]
    async fn oversize_response_drops_batch() {
        let huge = format!("[{}]", "x".repeat(60_000));
        let v = validator(
            ScriptedClient::new(vec![Ok(huge)]),
            ValidatorOptions::default(),
        );
        let outcome = v.validate(vec![crop("t", 0)], &ctx()).await;
        assert!(outcome.markers.is_empty());
        assert_eq!(outcome.batches_failed, 1);
    }

    #[tokio::test]
    async fn failed_batch_leaves_siblings_running() {
        let good = r#"[{"detail":"1","sheet":"A5"}]"#;
        let v = validator(
            ScriptedClient::new(vec![
                Err(LlmError::BadPayload("bad".into())),
                Ok(good.into()),
            ]),
            ValidatorOptions {
                batch_size: 1,
                concurrency: 1,
                ..ValidatorOptions::default()
            },
        );
        let outcome = v.validate(vec![crop("t", 0), crop("t", 100)], &ctx()).await;
        assert_eq!(outcome.batches_total, 2);
        assert_eq!(outcome.batches_failed, 1);
        assert_eq!(outcome.markers.len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_once() {
        let good = r#"[{"detail":"1","sheet":"A5"}]"#;
        let client = ScriptedClient::new(vec![
            Err(LlmError::Timeout(std::time::Duration::from_secs(60))),
            Ok(good.into()),
        ]);
        let v = validator(client, ValidatorOptions::default());
        let outcome = v.validate(vec![crop("t", 0)], &ctx()).await;
        assert_eq!(outcome.markers.len(), 1);
        assert_eq!(outcome.batches_failed, 0);
    }

    #[tokio::test]
    async fn empty_input_sends_nothing() {
        let client = ScriptedClient::new(vec![]);
        let v = validator(client, ValidatorOptions::default());
        let outcome = v.validate(vec![], &ctx()).await;
        assert_eq!(outcome.batches_total, 0);
        assert!(outcome.markers.is_empty());
    }
}
