//! Deterministic stand-ins for the store, the embedder and the completion backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use medirag::config::MediRagConfig;
use medirag::embeddings::Embedder;
use medirag::error::{EmbeddingError, GenerationError, StoreError};
use medirag::field_resolver::normalize_text;
use medirag::freshness::{NewPatientNotification, Notifier};
use medirag::generator::{CompletionRequest, Generator};
use medirag::models::{CaseRecord, PatientIdentity, PatientRecord, Prediction};
use medirag::records::{RecordStore, build_case_record};
use medirag::service::MediRag;

pub const DIM: usize = 64;

/// Bag-of-words hashing embedder. Words are accent-folded so questions and records
/// written with or without accents land close together.
#[derive(Default)]
pub struct HashEmbedder {
    pub fail: AtomicBool,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
    })
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in normalize_text(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        v[(fnv1a(word) % DIM as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Model("embedder switched off".into()));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

type Script = Box<dyn Fn(&CompletionRequest) -> Result<String, GenerationError> + Send + Sync>;

/// Completion backend answering from a closure and recording every request.
pub struct ScriptedGenerator {
    script: Script,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&CompletionRequest) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answers `text`.
    pub fn constant(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_user_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|r| r.user.clone())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        let answer = (self.script)(&request);
        self.requests.lock().unwrap().push(request);
        answer
    }
}

/// In-memory record store; records are kept newest first.
#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<Vec<PatientRecord>>,
    pub cases: Mutex<HashMap<String, CaseRecord>>,
    pub predictions: Mutex<HashMap<String, Prediction>>,
    pub fail: AtomicBool,
}

impl MemoryStore {
    pub fn with(records: Vec<PatientRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            ..Self::default()
        })
    }

    /// Register a newly created patient.
    pub fn admit(&self, record: PatientRecord) {
        self.records.lock().unwrap().insert(0, record);
    }

    pub fn discharge(&self, id: &str) {
        self.records.lock().unwrap().retain(|r| r.id != id);
    }

    pub fn add_case(&self, case: CaseRecord) {
        self.cases.lock().unwrap().insert(case.case_id.clone(), case);
    }

    /// Stamp an edit on an existing record.
    pub fn touch(&self, id: &str, updated_at: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.updated_at = Some(updated_at.to_string());
        }
    }

    /// Make every record read fail as an unreachable database would.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

impl RecordStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<PatientRecord>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Connection {
                url: "memory".to_string(),
                message: "store switched off".to_string(),
            });
        }
        Ok(self.records.lock().unwrap().clone())
    }

    fn identity(&self, patient_id: Option<&str>) -> Result<Option<PatientIdentity>, StoreError> {
        let records = self.records.lock().unwrap();
        let record = match patient_id {
            Some(id) => records.iter().find(|r| r.id == id),
            None => records.first(),
        };
        Ok(record.map(|r| PatientIdentity {
            patient_id: r.id.clone(),
            user_id: r.user_id.clone(),
            first_name: r.first_name.clone(),
            last_name: r.last_name.clone(),
            date_of_birth: r.date_of_birth.clone(),
            age: r.age,
        }))
    }

    fn case_record(&self, case_id: &str) -> Result<Option<CaseRecord>, StoreError> {
        if let Some(case) = self.cases.lock().unwrap().get(case_id) {
            return Ok(Some(case.clone()));
        }
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.id == case_id)
            .map(|r| build_case_record(case_id, Some(r), None)))
    }

    fn latest_prediction(&self, record: &PatientRecord) -> Result<Prediction, StoreError> {
        Ok(self
            .predictions
            .lock()
            .unwrap()
            .get(&record.id)
            .cloned()
            .unwrap_or(Prediction::Unavailable))
    }
}

/// Collects notifications instead of logging them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NewPatientNotification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &NewPatientNotification) {
        self.sent.lock().unwrap().push(notification.clone());
    }
}

pub fn patient(id: &str, first: &str, last: &str, age: i32) -> PatientRecord {
    PatientRecord {
        id: id.to_string(),
        user_id: Some(format!("u-{id}")),
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
        age: Some(age),
        gender: Some("F".to_string()),
        ..Default::default()
    }
}

pub fn test_config() -> MediRagConfig {
    MediRagConfig {
        api_key: "test-key".to_string(),
        ..MediRagConfig::default()
    }
}

pub struct Harness {
    pub app: MediRag,
    pub store: Arc<MemoryStore>,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness_with(
    config: &MediRagConfig,
    records: Vec<PatientRecord>,
    generator: Arc<ScriptedGenerator>,
) -> Harness {
    let store = MemoryStore::with(records);
    let embedder = HashEmbedder::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let app = MediRag::new(
        config,
        store.clone(),
        embedder.clone(),
        generator.clone(),
        notifier.clone(),
    );
    Harness {
        app,
        store,
        embedder,
        generator,
        notifier,
    }
}

pub fn harness(records: Vec<PatientRecord>) -> Harness {
    harness_with(&test_config(), records, ScriptedGenerator::constant("Réponse simulée"))
}
