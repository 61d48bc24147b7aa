//! Background classification worker.
//!
//! Creation enqueues a durable job row and nudges this worker over a
//! bounded channel. The row is authoritative: lost nudges, restarts and
//! classifier crashes all resolve on the next recovery scan, so a
//! challenge never sits in `Pending` because a notification went
//! missing.
use crate::classifier::{ClassificationJob, ClassificationOutcome, Classifier};
use crate::service::LifecycleService;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Wake-up channel for the classification worker.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<String>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Best-effort notification. A full or closed channel only delays
    /// the job until the next recovery pass.
    pub fn nudge(&self, challenge_id: &str) {
        if let Err(e) = self.tx.try_send(challenge_id.to_owned()) {
            tracing::warn!(challenge = %challenge_id, error = %e, "job queue nudge dropped");
        }
    }
}

/// Run the classification loop: first re-process any jobs left over
/// from a previous run, then serve wake-ups until the queue closes.
/// Each attempt races the classifier against the configured timeout; an
/// error or timeout rejects the challenge instead of leaving it
/// pending.
pub fn run_classifier_worker(
    service: Arc<LifecycleService>,
    classifier: Arc<dyn Classifier>,
    mut jobs: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match service.pending_classifications() {
            Ok(pending) => {
                for job in pending {
                    process_job(&service, classifier.as_ref(), &job).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "classification recovery scan failed"),
        }

        while let Some(challenge_id) = jobs.recv().await {
            match service.classification_job(&challenge_id) {
                Ok(Some(job)) => process_job(&service, classifier.as_ref(), &job).await,
                Ok(None) => {
                    tracing::debug!(challenge = %challenge_id, "nudge for an already finished job");
                }
                Err(e) => {
                    tracing::error!(challenge = %challenge_id, error = %e, "job lookup failed");
                }
            }
        }
        tracing::info!("classification worker stopped");
    })
}

async fn process_job(
    service: &LifecycleService,
    classifier: &dyn Classifier,
    job: &ClassificationJob,
) {
    let timeout = service.config().classification_timeout();
    let outcome = match tokio::time::timeout(timeout, classifier.classify(&job.request)).await {
        Ok(Ok(verdict)) => ClassificationOutcome::from(verdict),
        Ok(Err(e)) => ClassificationOutcome::Failed {
            reason: format!("classifier error: {e:#}"),
        },
        Err(_) => ClassificationOutcome::Failed {
            reason: format!("classifier timed out after {}ms", timeout.as_millis()),
        },
    };
    if let Err(e) = service.apply_classification(&job.request.challenge_id, outcome) {
        tracing::error!(
            challenge = %job.request.challenge_id,
            error = %e,
            "failed to apply classification outcome"
        );
    }
}
