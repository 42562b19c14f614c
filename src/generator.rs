//! # Answer generation
//!
//! Prompt construction on top of a pluggable [`Generator`].
//!
//! - [`AnswerGenerator::generate`] answers a question from retrieved chunks. When a
//!   prediction summary is among them it switches to the prediction-aware prompt.
//! - [`AnswerGenerator::generate_field`] produces a single bare form value, or
//!   `non disponible`.
//! - [`AnswerGenerator::analyze_new_patient`] writes the structured note sent when a new
//!   record shows up.
//!
//! Generation never fails from the caller's point of view: errors are turned into a
//! user-visible French sentence and logged.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tiktoken_rs::cl100k_base;
use tracing::*;

use crate::chunker::{Chunk, ChunkKind};
use crate::config::MediRagConfig;
use crate::error::GenerationError;
use crate::models::CaseRecord;

/// Separator placed between chunks in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Returned by the single-field fallback when the value cannot be produced.
pub const NOT_AVAILABLE: &str = "non disponible";

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(
        system: impl Into<String>,
        user: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature,
            max_tokens,
        }
    }
}

/// A text-completion capability.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError>;
}

const GROUNDED_SYSTEM_PROMPT: &str = "\
Tu es un assistant médical spécialisé dans l'analyse de la maladie de Parkinson.
Tu travailles avec des neurologues pour analyser les dossiers patients.

RÈGLES:
1. Base-toi UNIQUEMENT sur les données fournies dans le contexte
2. Si une information n'est pas présente, dis clairement que tu ne peux pas la confirmer
3. Réponds comme un assistant médical professionnel et empathique
4. Réponds toujours en français";

const PREDICTION_INSTRUCTIONS: &str = "

UTILISATION DES PRÉDICTIONS CNN SI DISPONIBLES:
- Le résultat IA indique l'état prédit:
    ➤ `Malade` ou score >= 0.5 = suspicion de Parkinson
    ➤ `Sain` ou score < 0.5 = pas d'indication forte de Parkinson
- La confiance, si présente, indique la fiabilité de la prédiction
- Intègre la prédiction dans l'analyse sans la présenter comme un diagnostic
- Adapte les recommandations:
    ➤ Si suspicion de Parkinson: suivi neurologique, kinésithérapie, hygiène de vie, exercices
    ➤ Si sain: prévention et conseils généraux";

const FIELD_SYSTEM_PROMPT: &str = "Tu es un assistant médical. Réponds uniquement par la valeur demandée en français, sans balises ni explications. Si l'information manque, réponds 'non disponible'.";

const ANALYSIS_SYSTEM_PROMPT: &str = "Tu es un système d'analyse médicale.";

const ANALYSIS_MAX_TOKENS: u32 = 1000;

/// Prompting policy over a [`Generator`].
#[derive(Clone)]
pub struct AnswerGenerator {
    generator: Arc<dyn Generator>,
    answer_temperature: f32,
    answer_max_tokens: u32,
    field_temperature: f32,
    field_max_tokens: u32,
    context_max_tokens: usize,
}

impl AnswerGenerator {
    pub fn new(generator: Arc<dyn Generator>, config: &MediRagConfig) -> Self {
        Self {
            generator,
            answer_temperature: config.answer_temperature,
            answer_max_tokens: config.answer_max_tokens,
            field_temperature: config.field_temperature,
            field_max_tokens: config.field_max_tokens,
            context_max_tokens: config.context_max_tokens,
        }
    }

    /// Answer `query` from `chunks`, grounded in them only.
    pub async fn generate(&self, query: &str, chunks: &[Chunk]) -> String {
        let with_prediction = chunks
            .iter()
            .any(|c| c.kind == ChunkKind::PredictionSummary);
        let request = CompletionRequest::new(
            system_prompt(with_prediction),
            answer_prompt(query, &self.context(chunks)),
            self.answer_temperature,
            self.answer_max_tokens,
        );
        debug!(
            "Generating answer from {} chunks (prediction-aware: {})",
            chunks.len(),
            with_prediction
        );
        match self.generator.complete(request).await {
            Ok(text) => text,
            Err(e) => {
                error!("Answer generation failed: {}", e);
                format!("Erreur lors de la génération de la réponse: {e}")
            }
        }
    }

    /// Produce only the value of `field` for `case`, or [`NOT_AVAILABLE`].
    pub async fn generate_field(&self, case: &CaseRecord, field: &str) -> String {
        let context = serde_json::to_string(&case.attributes).unwrap_or_default();
        let request = CompletionRequest::new(
            FIELD_SYSTEM_PROMPT,
            format!(
                "Contexte patient (JSON): {context}\n\nDonne uniquement la valeur pour le champ: {field}"
            ),
            self.field_temperature,
            self.field_max_tokens,
        );
        match self.generator.complete(request).await {
            Ok(text) => {
                let value = extract_field_value(text.trim(), field);
                if value.trim().is_empty() {
                    NOT_AVAILABLE.to_string()
                } else {
                    value
                }
            }
            Err(e) => {
                warn!("Field generation for {} failed: {}", field, e);
                NOT_AVAILABLE.to_string()
            }
        }
    }

    /// Structured note on a newly registered patient.
    pub async fn analyze_new_patient(&self, chunks: &[Chunk]) -> String {
        let context = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Analyse ce nouveau patient Parkinson:\n\n{context}\n\n\
             Structure:\n\
             1. 👤 PROFIL\n\
             2. 🔴 SYMPTÔMES PRINCIPAUX\n\
             3. ⚠️ POINTS D'ATTENTION\n\
             4. 💊 RECOMMANDATIONS\n\n\
             Sois concis et professionnel."
        );
        let request = CompletionRequest::new(
            ANALYSIS_SYSTEM_PROMPT,
            prompt,
            self.answer_temperature,
            ANALYSIS_MAX_TOKENS,
        );
        match self.generator.complete(request).await {
            Ok(text) => text,
            Err(e) => {
                error!("New patient analysis failed: {}", e);
                format!("Erreur lors de l'analyse du nouveau patient: {e}")
            }
        }
    }

    /// Join chunk contents in rank order, dropping the lowest-ranked ones that would
    /// exceed the context token budget. The first chunk is always kept.
    fn context(&self, chunks: &[Chunk]) -> String {
        let bpe = match cl100k_base() {
            Ok(bpe) => bpe,
            Err(e) => {
                warn!("Tokenizer unavailable, context is not budgeted: {}", e);
                return join_contents(chunks);
            }
        };

        let separator_tokens = bpe.encode_with_special_tokens(CONTEXT_SEPARATOR).len();
        let mut used = 0usize;
        let mut kept: Vec<&Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let cost = bpe.encode_with_special_tokens(&chunk.content).len()
                + if kept.is_empty() { 0 } else { separator_tokens };
            if !kept.is_empty() && used + cost > self.context_max_tokens {
                debug!(
                    "Context budget of {} tokens reached, dropping {} chunks",
                    self.context_max_tokens,
                    chunks.len() - kept.len()
                );
                break;
            }
            used += cost;
            kept.push(chunk);
        }
        kept.iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }
}

fn join_contents(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn system_prompt(with_prediction: bool) -> String {
    if with_prediction {
        format!("{GROUNDED_SYSTEM_PROMPT}{PREDICTION_INSTRUCTIONS}")
    } else {
        GROUNDED_SYSTEM_PROMPT.to_string()
    }
}

fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        "📌 CONTEXTE MÉDICAL DISPONIBLE:\n{context}\n\n\
         ❓ QUESTION:\n{query}\n\n\
         Réponds de manière claire, structurée et utile au clinicien."
    )
}

/// Models sometimes answer with JSON; keep the field's value or the bare string.
fn extract_field_value(text: &str, field: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => match map.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => text.to_string(),
            Some(other) => other.to_string(),
        },
        Ok(Value::String(s)) => s,
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and replies with a fixed outcome.
    struct Recorder {
        reply: Result<String, String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Recorder {
        fn new(reply: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for Recorder {
        async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map_err(GenerationError::Other)
        }
    }

    fn chunk(kind: ChunkKind, content: &str) -> Chunk {
        Chunk {
            kind,
            content: content.to_string(),
            patient_id: "p1".into(),
            patient_name: "Marie Curie".into(),
        }
    }

    #[tokio::test]
    async fn generate_joins_context_with_separator() {
        let rec = Recorder::new(Ok("Réponse"));
        let answers = AnswerGenerator::new(rec.clone(), &MediRagConfig::default());
        let chunks = [
            chunk(ChunkKind::PersonalInfo, "Patient ID: p1"),
            chunk(ChunkKind::MotorSymptoms, "=== SYMPTÔMES MOTEURS ==="),
        ];
        assert_eq!(answers.generate("Quels symptômes ?", &chunks).await, "Réponse");

        let seen = rec.seen.lock().unwrap();
        assert!(seen[0].user.contains("Patient ID: p1\n\n---\n\n=== SYMPTÔMES MOTEURS ==="));
        assert!(seen[0].user.contains("Quels symptômes ?"));
        assert!(!seen[0].system.contains("PRÉDICTIONS CNN"));
        assert_eq!(seen[0].temperature, 0.3);
        assert_eq!(seen[0].max_tokens, 1500);
    }

    #[tokio::test]
    async fn prediction_chunk_switches_prompt() {
        let rec = Recorder::new(Ok("ok"));
        let answers = AnswerGenerator::new(rec.clone(), &MediRagConfig::default());
        let chunks = [chunk(ChunkKind::PredictionSummary, "Résultat IA : Malade")];
        answers.generate("Analyse ?", &chunks).await;
        assert!(rec.seen.lock().unwrap()[0].system.contains("PRÉDICTIONS CNN"));
    }

    #[tokio::test]
    async fn failure_becomes_error_sentence() {
        let rec = Recorder::new(Err("boom"));
        let answers = AnswerGenerator::new(rec, &MediRagConfig::default());
        let text = answers
            .generate("q", &[chunk(ChunkKind::PersonalInfo, "x")])
            .await;
        assert!(text.starts_with("Erreur lors de la génération de la réponse"));
        assert!(text.contains("boom"));
    }

    #[tokio::test]
    async fn field_fallback_unwraps_json_and_defaults() {
        let case = CaseRecord::default();

        let rec = Recorder::new(Ok(r#"{"diagnosis": "Parkinson idiopathique"}"#));
        let answers = AnswerGenerator::new(rec.clone(), &MediRagConfig::default());
        assert_eq!(
            answers.generate_field(&case, "diagnosis").await,
            "Parkinson idiopathique"
        );
        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, 300);
        assert!(seen[0].user.ends_with("diagnosis"));
        drop(seen);

        let answers = AnswerGenerator::new(Recorder::new(Err("down")), &MediRagConfig::default());
        assert_eq!(answers.generate_field(&case, "diagnosis").await, NOT_AVAILABLE);

        let answers = AnswerGenerator::new(Recorder::new(Ok("  ")), &MediRagConfig::default());
        assert_eq!(answers.generate_field(&case, "diagnosis").await, NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn context_budget_keeps_top_ranked_chunk() {
        let rec = Recorder::new(Ok("ok"));
        let config = MediRagConfig {
            context_max_tokens: 5,
            ..MediRagConfig::default()
        };
        let answers = AnswerGenerator::new(rec.clone(), &config);
        let long = "symptôme ".repeat(50);
        let chunks = [
            chunk(ChunkKind::PersonalInfo, &long),
            chunk(ChunkKind::MotorSymptoms, "SECOND"),
        ];
        answers.generate("q", &chunks).await;
        let user = rec.seen.lock().unwrap()[0].user.clone();
        assert!(user.contains(long.as_str()));
        assert!(!user.contains("SECOND"));
    }
}
