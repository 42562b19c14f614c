//! # Service façade
//!
//! [`MediRag`] wires the store, the retrieval pipeline, the generators and the
//! freshness monitor together and exposes the operations the CLI and the HTTP
//! server share. Request and response types serialise to the JSON bodies of the
//! HTTP surface.
//!
//! Store hiccups never reach the caller as errors here: they are logged and
//! answered as "no data".

use std::collections::BTreeMap;
use std::sync::Arc;

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::api::OpenAiGenerator;
use crate::config::MediRagConfig;
use crate::embeddings::{Embedder, SentenceEmbeddingsModel};
use crate::error::{EmbeddingError, QueryError, RebuildError, StoreError};
use crate::field_resolver::{
    FieldResolution, FieldResolver, IdentityIntent, NO_IDENTITY_MESSAGE, NOT_FIELD_MESSAGE,
    field_label, identity_fields, identity_intent, identity_sentence, mentions_patient,
    requested_fields,
};
use crate::freshness::{FreshnessMonitor, FreshnessReport, LogNotifier, Notifier};
use crate::generator::{AnswerGenerator, Generator};
use crate::models::{CaseRecord, PatientIdentity, PatientStats};
use crate::records::{RecordStore, SqliteRecordStore, age_from_dob};
use crate::retrieval::Pipeline;

/// Returned when retrieval finds nothing for a question.
pub const NO_DATA_MESSAGE: &str = "Aucune donnée trouvée dans la base.";

pub const REBUILD_SUCCESS_MESSAGE: &str = "Index reconstruit avec succès";

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChatRequest {
    #[serde(alias = "query", default)]
    pub question: String,
    #[serde(default)]
    pub patient_id: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    fn from_source(response: impl Into<String>, source: &str) -> Self {
        Self {
            response: response.into(),
            source: Some(source.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FieldRequest {
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldResponse {
    Fields {
        case_id: String,
        fields: BTreeMap<String, String>,
    },
    NotField {
        message: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RebuildResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_patients: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PatientSummary {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PatientDetails {
    pub id: String,
    pub name: String,
    pub date_of_birth: Option<String>,
    pub computed_age: Option<i32>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// The retrieval-augmented assistant.
pub struct MediRag {
    store: Arc<dyn RecordStore>,
    pipeline: Arc<Pipeline>,
    answers: AnswerGenerator,
    resolver: FieldResolver,
    monitor: Arc<FreshnessMonitor>,
    top_k: usize,
}

impl MediRag {
    pub fn new(
        config: &MediRagConfig,
        store: Arc<dyn RecordStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&store), embedder, config);
        Self::assemble(config, store, Arc::new(pipeline), generator, notifier)
    }

    /// Production wiring: SQLite store, Hugging Face embedder, OpenAI-compatible
    /// generator, log notifications. Embedding progress is drawn on `progress`.
    pub fn from_config(
        config: &MediRagConfig,
        progress: Option<ProgressBar>,
    ) -> Result<Self, EmbeddingError> {
        let store: Arc<dyn RecordStore> =
            Arc::new(SqliteRecordStore::new(config.database_url.clone()));
        let embedder: Arc<dyn Embedder> =
            Arc::new(SentenceEmbeddingsModel::load(&config.embedding_model)?);
        let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(config));

        let mut pipeline = Pipeline::new(Arc::clone(&store), embedder, config);
        if let Some(bar) = progress {
            pipeline = pipeline.with_progress(bar);
        }
        Ok(Self::assemble(
            config,
            store,
            Arc::new(pipeline),
            generator,
            Arc::new(LogNotifier),
        ))
    }

    fn assemble(
        config: &MediRagConfig,
        store: Arc<dyn RecordStore>,
        pipeline: Arc<Pipeline>,
        generator: Arc<dyn Generator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let answers = AnswerGenerator::new(generator, config);
        let monitor = FreshnessMonitor::new(
            Arc::clone(&pipeline),
            answers.clone(),
            notifier,
            config.rebuild_on_edit,
        );
        Self {
            store,
            pipeline,
            resolver: FieldResolver::new(answers.clone()),
            answers,
            monitor: Arc::new(monitor),
            top_k: config.top_k,
        }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn monitor(&self) -> Arc<FreshnessMonitor> {
        Arc::clone(&self.monitor)
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Answer a free-form question.
    ///
    /// Identity questions are answered from the store, form-field questions about a
    /// targeted patient from the case, everything else through retrieval.
    ///
    /// # Errors
    /// [`QueryError::EmptyQuestion`] when the question is blank.
    pub async fn answer(&self, request: ChatRequest) -> Result<ChatResponse, QueryError> {
        let question = request.question.trim().to_string();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        let patient_id = non_blank(request.patient_id);
        debug!("Question: {:?} (patient: {:?})", question, patient_id);

        if let Some(intent) = identity_intent(&question) {
            return Ok(self.answer_identity(intent, patient_id).await);
        }

        if let Some(pid) = patient_id.as_deref() {
            if !requested_fields(&question).is_empty() {
                if let Some(response) = self.answer_fields(&question, pid).await {
                    return Ok(response);
                }
            }
        }

        Ok(self.answer_with_retrieval(&question, patient_id.as_deref()).await)
    }

    async fn answer_identity(
        &self,
        intent: IdentityIntent,
        patient_id: Option<String>,
    ) -> ChatResponse {
        let identity = self
            .with_store(move |s| s.identity(patient_id.as_deref()))
            .await
            .unwrap_or_else(|e| {
                warn!("Identity lookup failed: {}", e);
                None
            });
        let response = match identity {
            Some(identity) => identity_sentence(intent, &identity),
            None => NO_IDENTITY_MESSAGE.to_string(),
        };
        ChatResponse::from_source(response, "db_join")
    }

    async fn answer_fields(&self, question: &str, patient_id: &str) -> Option<ChatResponse> {
        let case = self.load_case(patient_id).await?;
        match self.resolver.resolve_field(question, &case).await {
            FieldResolution::Fields(fields) => {
                let response = fields
                    .iter()
                    .map(|(field, value)| format!("{}: {}", field_label(field), value))
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(ChatResponse::from_source(response, "fields"))
            }
            FieldResolution::NotField => None,
        }
    }

    async fn answer_with_retrieval(&self, question: &str, patient_id: Option<&str>) -> ChatResponse {
        let result = match self.pipeline.search_relevant_chunks(question, self.top_k).await {
            Ok(result) => result,
            Err(e) => {
                error!("Retrieval failed: {}", e);
                return ChatResponse {
                    response: NO_DATA_MESSAGE.to_string(),
                    error: Some(e.to_string()),
                    ..ChatResponse::default()
                };
            }
        };
        let result = match patient_id {
            Some(pid) => result.for_patient(pid),
            None => result,
        };
        if result.is_empty() {
            return ChatResponse::from_source(NO_DATA_MESSAGE, "rag");
        }

        let chunks = result.chunks();
        let response = self.answers.generate(question, &chunks).await;
        ChatResponse {
            response,
            chunks_used: Some(chunks.len()),
            source: Some("rag".to_string()),
            error: None,
        }
    }

    async fn load_case(&self, case_id: &str) -> Option<CaseRecord> {
        let id = case_id.to_string();
        self.with_store(move |s| s.case_record(&id))
            .await
            .unwrap_or_else(|e| {
                warn!("Case lookup for {} failed: {}", case_id, e);
                None
            })
    }

    /// Find the patient whose first and last name the message mentions.
    async fn detect_patient(&self, message: &str) -> Option<String> {
        let records = self
            .with_store(|s| s.load_all())
            .await
            .unwrap_or_else(|e| {
                warn!("Loading records for name detection failed: {}", e);
                Vec::new()
            });
        records
            .into_iter()
            .find(|r| mentions_patient(message, r.first_name.as_deref(), r.last_name.as_deref()))
            .map(|r| r.id)
    }

    /// Answer a form-field request against one case.
    ///
    /// Without a `case_id`, the case is the patient named in the message.
    ///
    /// # Errors
    /// - [`QueryError::EmptyQuestion`] when the message is blank.
    /// - [`QueryError::MissingCase`] when no case is given and no patient is named.
    /// - [`QueryError::CaseNotFound`] when the case does not exist.
    pub async fn field_query(&self, request: FieldRequest) -> Result<FieldResponse, QueryError> {
        let message = request.message.trim().to_string();
        if message.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let fields = requested_fields(&message);
        let intent = identity_intent(&message);
        if fields.is_empty() && intent.is_none() {
            return Ok(FieldResponse::NotField {
                message: NOT_FIELD_MESSAGE.to_string(),
            });
        }

        let case_id = match non_blank(request.case_id) {
            Some(id) => id,
            None => self
                .detect_patient(&message)
                .await
                .ok_or(QueryError::MissingCase)?,
        };
        let case = self
            .load_case(&case_id)
            .await
            .ok_or_else(|| QueryError::CaseNotFound(case_id.clone()))?;

        if !fields.is_empty() {
            if let FieldResolution::Fields(fields) = self.resolver.resolve_field(&message, &case).await {
                return Ok(FieldResponse::Fields { case_id, fields });
            }
        }
        match intent {
            Some(intent) => Ok(FieldResponse::Fields {
                fields: identity_fields(intent, &identity_of_case(&case)),
                case_id,
            }),
            None => Ok(FieldResponse::NotField {
                message: NOT_FIELD_MESSAGE.to_string(),
            }),
        }
    }

    /// Rebuild the index from scratch and resync the freshness baseline.
    pub async fn rebuild(&self) -> RebuildResponse {
        match self.monitor.rebuild_and_resync().await {
            Ok(report) => RebuildResponse {
                success: true,
                message: Some(REBUILD_SUCCESS_MESSAGE.to_string()),
                error: None,
                total_patients: report.records,
            },
            Err(e) => {
                error!("Rebuild failed: {}", e);
                RebuildResponse {
                    success: false,
                    message: None,
                    error: Some(e.to_string()),
                    total_patients: self.total_published().await,
                }
            }
        }
    }

    async fn total_published(&self) -> usize {
        self.pipeline
            .snapshot()
            .await
            .map(|s| s.record_count)
            .unwrap_or_default()
    }

    /// Run one freshness check.
    ///
    /// # Errors
    /// Fails when the store cannot be read or the triggered rebuild fails.
    pub async fn check(&self) -> Result<FreshnessReport, RebuildError> {
        self.monitor.check_and_maybe_rebuild().await
    }

    pub async fn stats(&self) -> PatientStats {
        self.with_store(|s| s.stats()).await.unwrap_or_else(|e| {
            warn!("Statistics unavailable: {}", e);
            PatientStats::default()
        })
    }

    /// Every patient as id and display name, newest first.
    pub async fn patients(&self) -> Vec<PatientSummary> {
        self.load_records()
            .await
            .into_iter()
            .map(|r| PatientSummary {
                name: summary_name(r.first_name.as_deref(), r.last_name.as_deref(), &r.id),
                id: r.id,
            })
            .collect()
    }

    /// Every patient with the age computed from the date of birth.
    pub async fn patient_details(&self) -> Vec<PatientDetails> {
        let today = chrono::Local::now().date_naive();
        self.load_records()
            .await
            .into_iter()
            .map(|r| PatientDetails {
                name: summary_name(r.first_name.as_deref(), r.last_name.as_deref(), &r.id),
                computed_age: r
                    .date_of_birth
                    .as_deref()
                    .and_then(|dob| age_from_dob(dob, today)),
                date_of_birth: r.date_of_birth,
                id: r.id,
            })
            .collect()
    }

    async fn load_records(&self) -> Vec<crate::models::PatientRecord> {
        self.with_store(|s| s.load_all()).await.unwrap_or_else(|e| {
            warn!("Loading patients failed: {}", e);
            Vec::new()
        })
    }
}

fn summary_name(first: Option<&str>, last: Option<&str>, id: &str) -> String {
    let name = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() { id.to_string() } else { name }
}

fn identity_of_case(case: &CaseRecord) -> PatientIdentity {
    let get = |key: &str| case.value(key).map(str::to_string);
    PatientIdentity {
        patient_id: get("patient_id").unwrap_or_else(|| case.case_id.clone()),
        user_id: get("user_id"),
        first_name: get("first_name"),
        last_name: get("last_name"),
        date_of_birth: get("date_of_birth"),
        age: case.value("age").and_then(|a| a.parse().ok()).or_else(|| {
            case.value("date_of_birth")
                .and_then(|dob| age_from_dob(dob, chrono::Local::now().date_naive()))
        }),
    }
}
