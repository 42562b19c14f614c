//! # Freshness monitor
//!
//! Keeps the published index in step with the record store.
//!
//! The monitor remembers the [`StoreFingerprint`] the current index was built from.
//! A check compares it with the store:
//!
//! - more records: full rebuild, then the newest patient is analysed and a
//!   notification is sent through the configured [`Notifier`];
//! - fewer records: the baseline is resynced, nothing is rebuilt;
//! - same count but a newer `updated_at`: rebuild only when `rebuild_on_edit` is set.
//!
//! The baseline only moves after a successful rebuild, so a failed one is retried on
//! the next check. Until a first build succeeds there is no baseline, and the check
//! that eventually builds the index announces nothing. There is no partial indexing.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::*;

use crate::chunker::Chunk;
use crate::error::RebuildError;
use crate::generator::AnswerGenerator;
use crate::models::StoreFingerprint;
use crate::retrieval::{Pipeline, RebuildReport};

/// Outcome of one freshness check.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct FreshnessReport {
    pub rebuilt: bool,
    pub new_records: usize,
    pub total_records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// A newly detected patient together with the generated analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPatientNotification {
    pub patient_id: String,
    pub patient_name: String,
    pub analysis: String,
}

impl NewPatientNotification {
    /// The framed text shown to the neurologist.
    pub fn render(&self) -> String {
        let rule = "═".repeat(62);
        format!(
            "╔{rule}╗\n\
             ║          🆕 NOUVEAU PATIENT DÉTECTÉ - PARKINSON             ║\n\
             ╚{rule}╝\n\
             \n\
             👤 Patient: {}\n\
             🆔 ID: {}\n\
             \n\
             {}\n\
             \n\
             {rule}\n\
             ✅ L'index a été mis à jour automatiquement.",
            self.patient_name, self.patient_id, self.analysis
        )
    }
}

/// Delivers new-patient notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &NewPatientNotification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &NewPatientNotification) {
        info!("\n{}", notification.render());
    }
}

pub struct FreshnessMonitor {
    pipeline: Arc<Pipeline>,
    answers: AnswerGenerator,
    notifier: Arc<dyn Notifier>,
    rebuild_on_edit: bool,
    baseline: Mutex<Option<StoreFingerprint>>,
}

impl FreshnessMonitor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        answers: AnswerGenerator,
        notifier: Arc<dyn Notifier>,
        rebuild_on_edit: bool,
    ) -> Self {
        Self {
            pipeline,
            answers,
            notifier,
            rebuild_on_edit,
            baseline: Mutex::new(None),
        }
    }

    async fn fingerprint(&self) -> Result<StoreFingerprint, RebuildError> {
        let store = self.pipeline.store();
        Ok(tokio::task::spawn_blocking(move || store.fingerprint())
            .await
            .map_err(|e| RebuildError::Task(e.to_string()))??)
    }

    /// Rebuild unconditionally and take the store's current state as the baseline.
    pub async fn rebuild_and_resync(&self) -> Result<RebuildReport, RebuildError> {
        let mut baseline = self.baseline.lock().await;
        let current = self.fingerprint().await?;
        let report = self.pipeline.rebuild().await?;
        *baseline = Some(current);
        Ok(report)
    }

    /// The fingerprint the published index reflects, if any.
    pub async fn baseline(&self) -> Option<StoreFingerprint> {
        self.baseline.lock().await.clone()
    }

    /// Compare the store with the baseline and rebuild when it grew.
    ///
    /// # Errors
    /// Fails when the store cannot be read or the rebuild fails; the baseline is kept.
    pub async fn check_and_maybe_rebuild(&self) -> Result<FreshnessReport, RebuildError> {
        let mut baseline = self.baseline.lock().await;
        let current = self.fingerprint().await?;
        let Some(last) = (*baseline).clone() else {
            // No index was ever built: the stored records are not new.
            info!("No baseline yet, building the index over {} records", current.count);
            self.pipeline.rebuild().await?;
            let total_records = current.count;
            *baseline = Some(current);
            return Ok(FreshnessReport {
                rebuilt: true,
                total_records,
                ..FreshnessReport::default()
            });
        };

        if current.count > last.count {
            let new_records = current.count - last.count;
            info!("{} new patient(s) detected", new_records);
            self.pipeline.rebuild().await?;
            let total_records = current.count;
            *baseline = Some(current);
            drop(baseline);

            let analysis = self.analyze_newest().await;
            return Ok(FreshnessReport {
                rebuilt: true,
                new_records,
                total_records,
                analysis,
            });
        }

        if current.count < last.count {
            info!(
                "Record count dropped from {} to {}, baseline resynced",
                last.count, current.count
            );
            let total_records = current.count;
            *baseline = Some(current);
            return Ok(FreshnessReport {
                total_records,
                ..FreshnessReport::default()
            });
        }

        if self.rebuild_on_edit && current.last_updated != last.last_updated {
            info!("Records edited since last build, rebuilding");
            self.pipeline.rebuild().await?;
            let total_records = current.count;
            *baseline = Some(current);
            return Ok(FreshnessReport {
                rebuilt: true,
                total_records,
                ..FreshnessReport::default()
            });
        }

        debug!("Index is fresh ({} records)", current.count);
        Ok(FreshnessReport {
            total_records: current.count,
            ..FreshnessReport::default()
        })
    }

    /// Analyse and announce the newest record of the freshly published snapshot.
    async fn analyze_newest(&self) -> Option<String> {
        let snapshot = self.pipeline.snapshot().await?;
        let newest_id = snapshot.chunks.first()?.patient_id.clone();
        let chunks: Vec<Chunk> = snapshot
            .chunks
            .iter()
            .filter(|c| c.patient_id == newest_id)
            .cloned()
            .collect();
        let patient_name = chunks.first()?.patient_name.clone();

        info!("Analysing new patient {}", newest_id);
        let analysis = self.answers.analyze_new_patient(&chunks).await;
        self.notifier.notify(&NewPatientNotification {
            patient_id: newest_id,
            patient_name,
            analysis: analysis.clone(),
        });
        Some(analysis)
    }

    /// Run [`Self::check_and_maybe_rebuild`] every `interval` until the task is aborted.
    pub fn spawn_polling(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the startup rebuild already ran.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.check_and_maybe_rebuild().await {
                    error!("Freshness check failed: {}", e);
                }
            }
        })
    }
}
