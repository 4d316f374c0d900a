use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shared::{AnalysisResult, Confidence};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

use crate::classifier::SkinClassifier;
use crate::classifier::guard::{GuardError, SkinGuard};
use crate::config::WorkerSettings;
use crate::tasks::task_store::{TaskStore, TaskStoreError};
use crate::trials::TrialSearch;

pub const NOT_SKIN_CONDITION: &str = "Not a Skin Condition";

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error("Analysis aborted: {0}")]
    Aborted(String),
    #[error("Worker pool closed")]
    PoolClosed,
}

/// Runs each submitted image through guard, classifier and trial search on
/// its own background task and records exactly one terminal state.
#[derive(Clone)]
pub struct Orchestrator {
    store: TaskStore,
    classifier: Arc<dyn SkinClassifier>,
    trials: Arc<dyn TrialSearch>,
    guard: Option<SkinGuard>,
    permits: Arc<Semaphore>,
    processing_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        store: TaskStore,
        classifier: Arc<dyn SkinClassifier>,
        trials: Arc<dyn TrialSearch>,
        settings: &WorkerSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            trials,
            guard: None,
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            processing_delay: Duration::from_millis(settings.processing_delay_ms),
        }
    }

    pub fn with_guard(mut self, guard: SkinGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Registers the task as processing, then schedules its analysis and
    /// returns without waiting for it.
    pub fn submit(&self, task_id: Uuid, image: Vec<u8>) -> Result<JoinHandle<()>, TaskStoreError> {
        self.store.create(task_id)?;
        debug!("Scheduling task {} ({} bytes)", task_id, image.len());
        let worker = self.clone();
        Ok(tokio::spawn(async move { worker.run(task_id, image).await }))
    }

    async fn run(self, task_id: Uuid, image: Vec<u8>) {
        // The UX delay does not occupy a worker slot.
        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }
        let outcome = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                let worker = self.clone();
                tokio::spawn(async move { worker.analyze(&image).await })
                    .await
                    .unwrap_or_else(|e| Err(OrchestratorError::Aborted(join_error_message(e))))
            }
            Err(_) => Err(OrchestratorError::PoolClosed),
        };

        let written = match outcome {
            Ok(result) => {
                info!(
                    "Task {} classified as {} ({}), {} trials",
                    task_id,
                    result.condition,
                    result.confidence,
                    result.trials.len()
                );
                self.store.set_completed(task_id, result)
            }
            Err(e) => {
                warn!("Task {} failed: {}", task_id, e);
                self.store.set_error(task_id, e.to_string())
            }
        };
        if let Err(e) = written {
            error!("Could not record outcome of task {}: {}", task_id, e);
        }
    }

    async fn analyze(&self, image: &[u8]) -> Result<AnalysisResult, OrchestratorError> {
        if let Some(guard) = &self.guard {
            let verdict = guard.inspect(image).await?;
            if !verdict.is_skin {
                return Ok(AnalysisResult {
                    condition: NOT_SKIN_CONDITION.to_string(),
                    confidence: Confidence::High,
                    explanation: format!(
                        "The uploaded image does not appear to show skin: {}.",
                        verdict.description
                    ),
                    trials: Vec::new(),
                });
            }
        }

        let classification = self.classifier.classify(image).await;
        debug!(
            "Classifier verdict {} ({}), raw score {}",
            classification.condition,
            classification.confidence,
            classification
                .raw_score
                .map_or_else(|| "n/a".to_string(), |score| format!("{:.3}", score))
        );
        let trials = if classification.condition.trim().is_empty() {
            Vec::new()
        } else {
            self.trials.find(&classification.condition).await
        };

        Ok(AnalysisResult {
            condition: classification.condition,
            confidence: classification.confidence,
            explanation: classification.explanation,
            trials,
        })
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Model inference failed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::local::{NEGATIVE_LABEL, POSITIVE_LABEL};
    use crate::classifier::test_images::{solid_jpeg, solid_png};
    use crate::classifier::{Classification, ClassifierAdapter};
    use crate::classifier::local::ErythemaModel;
    use crate::trials::fallback_trials;
    use async_trait::async_trait;
    use shared::{TaskStatus, TrialSummary};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct FixedClassifier {
        condition: String,
    }

    #[async_trait]
    impl SkinClassifier for FixedClassifier {
        async fn classify(&self, _image: &[u8]) -> Classification {
            Classification {
                condition: self.condition.clone(),
                confidence: Confidence::Medium,
                explanation: format!("fixed {}", self.condition),
                raw_score: None,
            }
        }
    }

    /// Echoes the image bytes back as the condition.
    struct EchoClassifier;

    #[async_trait]
    impl SkinClassifier for EchoClassifier {
        async fn classify(&self, image: &[u8]) -> Classification {
            Classification {
                condition: String::from_utf8_lossy(image).into_owned(),
                confidence: Confidence::High,
                explanation: "echo".into(),
                raw_score: None,
            }
        }
    }

    struct GatedClassifier {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl SkinClassifier for GatedClassifier {
        async fn classify(&self, _image: &[u8]) -> Classification {
            self.gate.notified().await;
            ClassifierAdapter::mock_result()
        }
    }

    struct PanickingClassifier;

    #[async_trait]
    impl SkinClassifier for PanickingClassifier {
        async fn classify(&self, _image: &[u8]) -> Classification {
            panic!("tensor shape mismatch");
        }
    }

    #[derive(Default)]
    struct CountingTrials {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrialSearch for CountingTrials {
        async fn find(&self, condition: &str) -> Vec<TrialSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            vec![TrialSummary {
                id: format!("NCT-{condition}"),
                title: condition.to_string(),
                status: "RECRUITING".into(),
                phases: Vec::new(),
                locations: Vec::new(),
                match_reason: String::new(),
            }]
        }
    }

    struct FallbackTrials;

    #[async_trait]
    impl TrialSearch for FallbackTrials {
        async fn find(&self, _condition: &str) -> Vec<TrialSummary> {
            fallback_trials()
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            max_concurrent: 4,
            processing_delay_ms: 0,
        }
    }

    fn orchestrator(
        classifier: Arc<dyn SkinClassifier>,
        trials: Arc<dyn TrialSearch>,
    ) -> Orchestrator {
        Orchestrator::new(TaskStore::new(), classifier, trials, &settings())
    }

    #[tokio::test]
    async fn completes_with_classification_and_trials() {
        let trials = Arc::new(CountingTrials::default());
        let orch = orchestrator(
            Arc::new(FixedClassifier {
                condition: POSITIVE_LABEL.into(),
            }),
            trials.clone(),
        );
        let id = Uuid::new_v4();
        orch.submit(id, vec![1, 2, 3]).unwrap().await.unwrap();

        let task = orch.store().get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let result = task.result.unwrap();
        assert_eq!(result.condition, POSITIVE_LABEL);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.trials[0].id, format!("NCT-{POSITIVE_LABEL}"));
        assert_eq!(trials.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_condition_skips_trial_search() {
        let trials = Arc::new(CountingTrials::default());
        let orch = orchestrator(
            Arc::new(FixedClassifier {
                condition: "  ".into(),
            }),
            trials.clone(),
        );
        let id = Uuid::new_v4();
        orch.submit(id, vec![0]).unwrap().await.unwrap();

        let result = orch.store().get(id).unwrap().result.unwrap();
        assert!(result.trials.is_empty());
        assert_eq!(trials.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn processing_until_work_finishes() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            Arc::new(GatedClassifier { gate: gate.clone() }),
            Arc::new(FallbackTrials),
        );
        let id = Uuid::new_v4();
        let handle = orch.submit(id, vec![0]).unwrap();

        assert_eq!(orch.store().get(id).unwrap().status, TaskStatus::Processing);
        assert_eq!(orch.store().get(id).unwrap().status, TaskStatus::Processing);

        gate.notify_one();
        handle.await.unwrap();

        let done = orch.store().get(id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        for _ in 0..3 {
            assert_eq!(orch.store().get(id).unwrap(), done);
        }
    }

    #[tokio::test]
    async fn panic_in_analysis_becomes_error_state() {
        let orch = orchestrator(Arc::new(PanickingClassifier), Arc::new(FallbackTrials));
        let id = Uuid::new_v4();
        orch.submit(id, vec![0]).unwrap().await.unwrap();

        let task = orch.store().get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.result.is_none());
        assert!(task.error.unwrap().contains("tensor shape mismatch"));
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let orch = orchestrator(
            Arc::new(FixedClassifier {
                condition: "x".into(),
            }),
            Arc::new(FallbackTrials),
        );
        let id = Uuid::new_v4();
        orch.submit(id, vec![0]).unwrap().await.unwrap();
        assert!(matches!(
            orch.submit(id, vec![0]),
            Err(TaskStoreError::Duplicate(_))
        ));
        assert_eq!(orch.store().get(id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn guard_short_circuits_non_skin_images() {
        let trials = Arc::new(CountingTrials::default());
        let orch = orchestrator(
            Arc::new(FixedClassifier {
                condition: POSITIVE_LABEL.into(),
            }),
            trials.clone(),
        )
        .with_guard(SkinGuard::new(0.15));
        let id = Uuid::new_v4();
        orch.submit(id, solid_jpeg(10, 10, [0, 0, 0])).unwrap().await.unwrap();

        let result = orch.store().get(id).unwrap().result.unwrap();
        assert_eq!(result.condition, NOT_SKIN_CONDITION);
        assert_eq!(result.confidence, Confidence::High);
        assert!(result.trials.is_empty());
        assert!(result.explanation.contains("skin tones"));
        assert_eq!(trials.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn guard_passes_skin_images_through() {
        let orch = orchestrator(
            Arc::new(FixedClassifier {
                condition: POSITIVE_LABEL.into(),
            }),
            Arc::new(FallbackTrials),
        )
        .with_guard(SkinGuard::new(0.15));
        let id = Uuid::new_v4();
        orch.submit(id, solid_png(10, 10, [224, 172, 140])).unwrap().await.unwrap();

        let result = orch.store().get(id).unwrap().result.unwrap();
        assert_eq!(result.condition, POSITIVE_LABEL);
        assert_eq!(result.trials.len(), 2);
    }

    #[tokio::test]
    async fn guard_decode_failure_is_error_state() {
        let orch = orchestrator(
            Arc::new(FixedClassifier {
                condition: POSITIVE_LABEL.into(),
            }),
            Arc::new(FallbackTrials),
        )
        .with_guard(SkinGuard::new(0.15));
        let id = Uuid::new_v4();
        orch.submit(id, b"not an image".to_vec()).unwrap().await.unwrap();

        let task = orch.store().get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error.unwrap().contains("Skin check failed"));
    }

    #[tokio::test]
    async fn black_jpeg_through_local_model() {
        let orch = orchestrator(
            Arc::new(ClassifierAdapter::new(Box::new(ErythemaModel::new()))),
            Arc::new(FallbackTrials),
        );
        let id = Uuid::new_v4();
        orch.submit(id, solid_jpeg(10, 10, [0, 0, 0])).unwrap().await.unwrap();

        let result = orch.store().get(id).unwrap().result.unwrap();
        assert!(result.condition == POSITIVE_LABEL || result.condition == NEGATIVE_LABEL);
        assert!(!result.explanation.is_empty());
        if result.condition == POSITIVE_LABEL {
            assert!((1..=5).contains(&result.trials.len()));
            assert!(result.trials.iter().all(|t| !t.id.is_empty()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_do_not_share_results() {
        let orch = orchestrator(Arc::new(EchoClassifier), Arc::new(CountingTrials::default()));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let a = orch.submit(first, b"first".to_vec()).unwrap();
        let b = orch.submit(second, b"second".to_vec()).unwrap();
        a.await.unwrap();
        b.await.unwrap();

        let first_result = orch.store().get(first).unwrap().result.unwrap();
        let second_result = orch.store().get(second).unwrap().result.unwrap();
        assert_eq!(first_result.condition, "first");
        assert_eq!(first_result.trials[0].id, "NCT-first");
        assert_eq!(second_result.condition, "second");
        assert_eq!(second_result.trials[0].id, "NCT-second");
    }

    #[tokio::test]
    async fn processing_delay_does_not_hold_a_worker_slot() {
        let orch = Orchestrator::new(
            TaskStore::new(),
            Arc::new(EchoClassifier),
            Arc::new(FallbackTrials),
            &WorkerSettings {
                max_concurrent: 1,
                processing_delay_ms: 400,
            },
        );
        let started = std::time::Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|i| orch.submit(Uuid::new_v4(), format!("task-{i}").into_bytes()).unwrap())
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        // Four delays served one after another would take at least 1.6s.
        assert!(started.elapsed() < Duration::from_millis(1200));
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn single_permit_still_finishes_every_task() {
        let orch = Orchestrator::new(
            TaskStore::new(),
            Arc::new(EchoClassifier),
            Arc::new(FallbackTrials),
            &WorkerSettings {
                max_concurrent: 1,
                processing_delay_ms: 0,
            },
        );
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let handles: Vec<_> = ids
            .iter()
            .map(|id| orch.submit(*id, id.to_string().into_bytes()).unwrap())
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        for id in ids {
            let task = orch.store().get(id).unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.result.unwrap().condition, id.to_string());
        }
    }
}
