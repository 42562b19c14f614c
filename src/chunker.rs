//! # Chunking
//!
//! Turns one [`PatientRecord`] into the retrievable text units of the index.
//!
//! Each record yields, in order:
//!
//! 1. personal information,
//! 2. physical data (height, weight, BMI, history, other conditions),
//! 3. motor symptoms (`n/7`),
//! 4. non-motor symptoms (`n/8`),
//! 5. zero or more free-text segments of `observations`,
//! 6. a clinical synthesis with alert flags,
//! 7. a prediction summary with recommendations for the predicted class.
//!
//! Every chunk repeats the patient's name and id so a retrieved chunk is
//! self-describing. Chunking never fails: missing values render as `N/A` or an
//! explicit French placeholder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{PatientRecord, Prediction, non_blank};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Motor symptoms present at or above this count raise the severe-motor alert.
const SEVERE_MOTOR_THRESHOLD: usize = 4;

/// The section of a record a chunk was cut from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    PersonalInfo,
    PhysicalData,
    MotorSymptoms,
    NonMotorSymptoms,
    /// 1-based part number of the observations text.
    FreeTextSegment(usize),
    ClinicalSynthesis,
    PredictionSummary,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKind::PersonalInfo => f.write_str("personal-info"),
            ChunkKind::PhysicalData => f.write_str("physical-data"),
            ChunkKind::MotorSymptoms => f.write_str("motor-symptoms"),
            ChunkKind::NonMotorSymptoms => f.write_str("non-motor-symptoms"),
            ChunkKind::FreeTextSegment(n) => write!(f, "free-text-segment-{n}"),
            ChunkKind::ClinicalSynthesis => f.write_str("clinical-synthesis"),
            ChunkKind::PredictionSummary => f.write_str("prediction-summary"),
        }
    }
}

/// One retrievable unit of text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub content: String,
    pub patient_id: String,
    pub patient_name: String,
}

/// Segmentation settings for the free-text part of a record.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Build every chunk of `record`.
    pub fn patient_chunks(&self, record: &PatientRecord, prediction: &Prediction) -> Vec<Chunk> {
        let name = record.display_name();
        let id = record.id.as_str();
        let header = format!("Patient: {name} (ID: {id})");
        let chunk = |kind: ChunkKind, content: String| Chunk {
            kind,
            content: content.trim().to_string(),
            patient_id: id.to_string(),
            patient_name: name.clone(),
        };

        let mut chunks = Vec::with_capacity(8);
        chunks.push(chunk(ChunkKind::PersonalInfo, personal_info(record, &name)));
        chunks.push(chunk(ChunkKind::PhysicalData, physical_data(record, &header)));

        let motor = record.motor_flags();
        let non_motor = record.non_motor_flags();
        chunks.push(chunk(
            ChunkKind::MotorSymptoms,
            symptom_block(
                &header,
                "=== SYMPTÔMES MOTEURS ===",
                &motor,
                "Aucun symptôme moteur détecté",
                "Gravité motrice",
            ),
        ));
        chunks.push(chunk(
            ChunkKind::NonMotorSymptoms,
            symptom_block(
                &header,
                "=== SYMPTÔMES NON-MOTEURS ===",
                &non_motor,
                "Aucun symptôme non-moteur détecté",
                "Impact non-moteur",
            ),
        ));

        if let Some(observations) = non_blank(record.observations.as_deref()) {
            let parts = chunk_text(observations, self.chunk_size, self.overlap);
            let total = parts.len();
            for (i, part) in parts.into_iter().enumerate() {
                chunks.push(chunk(
                    ChunkKind::FreeTextSegment(i + 1),
                    format!(
                        "{header}\n=== OBSERVATIONS MÉDICALES (Partie {}/{total}) ===\n{part}",
                        i + 1
                    ),
                ));
            }
        }

        chunks.push(chunk(ChunkKind::ClinicalSynthesis, synthesis(record, &header)));
        chunks.push(chunk(
            ChunkKind::PredictionSummary,
            prediction_summary(record, prediction, &header),
        ));
        chunks
    }
}

/// Chunk a record with the default segmentation settings.
pub fn create_patient_chunks(record: &PatientRecord, prediction: &Prediction) -> Vec<Chunk> {
    Chunker::default().patient_chunks(record, prediction)
}

fn or_na<T: fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn text_or<'a>(v: &'a Option<String>, placeholder: &'a str) -> &'a str {
    non_blank(v.as_deref()).unwrap_or(placeholder)
}

fn personal_info(r: &PatientRecord, name: &str) -> String {
    let age = r
        .age
        .map(|a| format!("{a} ans"))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "Patient ID: {}\n\
         Nom complet: {name}\n\
         Âge: {age}\n\
         Genre: {}\n\
         Date de naissance: {}\n\
         Téléphone: {}\n\
         Adresse: {}\n\
         Contact d'urgence: {}\n\
         User ID: {}\n\
         Date d'enregistrement: {}\n\
         Dernière mise à jour: {}",
        r.id,
        text_or(&r.gender, "N/A"),
        text_or(&r.date_of_birth, "N/A"),
        text_or(&r.phone, "N/A"),
        text_or(&r.address, "N/A"),
        text_or(&r.emergency_contact, "N/A"),
        text_or(&r.user_id, "N/A"),
        text_or(&r.created_at, "N/A"),
        text_or(&r.updated_at, "N/A"),
    )
}

/// Body-mass index rounded to two decimals, when both measures are known and positive.
pub fn body_mass_index(height_cm: Option<i32>, weight_kg: Option<i32>) -> Option<f64> {
    match (height_cm, weight_kg) {
        (Some(h), Some(w)) if h > 0 && w > 0 => {
            let m = f64::from(h) / 100.0;
            Some((f64::from(w) / (m * m) * 100.0).round() / 100.0)
        }
        _ => None,
    }
}

fn physical_data(r: &PatientRecord, header: &str) -> String {
    let bmi = body_mass_index(r.height_cm, r.weight_kg)
        .map(|b| format!("{b:.2}"))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "{header}\n\
         === DONNÉES PHYSIQUES ===\n\
         Taille: {} cm\n\
         Poids: {} kg\n\
         IMC: {bmi}\n\
         \n\
         === HISTORIQUE MÉDICAL ===\n\
         {}\n\
         \n\
         === AUTRES MALADIES ===\n\
         Présence d'autres maladies: {}\n\
         Détails: {}",
        or_na(r.height_cm),
        or_na(r.weight_kg),
        text_or(&r.medical_history, "Aucun historique enregistré"),
        if r.other_conditions { "Oui" } else { "Non" },
        text_or(&r.other_conditions_details, "Aucune autre maladie"),
    )
}

fn symptom_block(
    header: &str,
    title: &str,
    flags: &[(&str, bool)],
    none_present: &str,
    ratio_label: &str,
) -> String {
    let present: Vec<String> = flags
        .iter()
        .filter(|(_, on)| *on)
        .map(|(label, _)| format!("✓ {label}"))
        .collect();
    let absent: Vec<String> = flags
        .iter()
        .filter(|(_, on)| !*on)
        .map(|(label, _)| format!("✗ {label}"))
        .collect();

    let present_text = if present.is_empty() {
        none_present.to_string()
    } else {
        present.join("\n")
    };
    let absent_text = if absent.is_empty() {
        "Tous les symptômes sont présents".to_string()
    } else {
        absent.join("\n")
    };

    format!(
        "{header}\n\
         {title}\n\
         \n\
         SYMPTÔMES PRÉSENTS ({}):\n\
         {present_text}\n\
         \n\
         SYMPTÔMES ABSENTS ({}):\n\
         {absent_text}\n\
         \n\
         {ratio_label}: {}/{} symptômes présents",
        present.len(),
        absent.len(),
        present.len(),
        flags.len(),
    )
}

fn alert(on: bool) -> &'static str {
    if on { "OUI ⚠️" } else { "Non" }
}

fn synthesis(r: &PatientRecord, header: &str) -> String {
    let motor = r.motor_count();
    let non_motor = r.non_motor_count();
    let age = or_na(r.age);
    format!(
        "{header}\n\
         === SYNTHÈSE CLINIQUE GLOBALE ===\n\
         \n\
         Profil: {}, {age} ans\n\
         État général: {}/15 symptômes de Parkinson détectés\n\
         \n\
         Répartition:\n\
         - Symptômes moteurs: {motor}/7\n\
         - Symptômes non-moteurs: {non_motor}/8\n\
         \n\
         Indicateurs d'alerte:\n\
         - Troubles moteurs sévères: {}\n\
         - Impact psychologique: {}\n\
         - Risque de chute: {}\n\
         \n\
         Dernière évaluation: {}",
        text_or(&r.gender, "N/A"),
        motor + non_motor,
        alert(motor >= SEVERE_MOTOR_THRESHOLD),
        alert(r.depression_anxiete),
        alert(r.instabilite || r.difficulte_marche),
        text_or(&r.updated_at, "N/A"),
    )
}

const POSITIVE_RECOMMENDATIONS: &str = "\
⚕️ Recommandations pour un patient atteint de Parkinson :
• Suivi régulier en neurologie (chaque 3 à 6 mois)
• Kinésithérapie pour la mobilité et l'équilibre
• Activité physique adaptée : marche, tai-chi, stretching
• Suivi psychologique si anxiété/dépression
• Nutrition : hydratation + fibres
• Adapter l'environnement pour éviter les chutes";

const NEGATIVE_RECOMMENDATIONS: &str = "\
🟢 L'analyse CNN ne montre pas de signes de maladie de Parkinson.
Recommandations générales :
• Activité physique régulière (prévention)
• Surveillance annuelle neurologique si symptômes évoluent
• Hygiène de sommeil
• Réduction du stress et anxiété";

fn prediction_summary(r: &PatientRecord, prediction: &Prediction, header: &str) -> String {
    let positive = prediction.is_positive();
    format!(
        "{header}\n\
         === ANALYSE IA : CNN Parkinson ===\n\
         \n\
         Résultat IA : {}\n\
         \n\
         Risque clinique basé sur les symptômes :\n\
         - Symptômes moteurs: {}/7\n\
         - Symptômes non-moteurs: {}/8\n\
         \n\
         Conclusion: {}\n\
         \n\
         {}",
        prediction.summary(),
        r.motor_count(),
        r.non_motor_count(),
        if positive {
            "⚠️ Suspicion élevée de Parkinson"
        } else {
            "Pas de signes évidents de Parkinson"
        },
        if positive {
            POSITIVE_RECOMMENDATIONS
        } else {
            NEGATIVE_RECOMMENDATIONS
        },
    )
}

/// Split `text` into overlapping segments of at most `chunk_size` characters.
///
/// Sizes are counted in Unicode scalar values. A window that does not reach the end
/// of the text is cut back to its last whitespace, provided that whitespace sits
/// after the first `overlap` characters. Whitespace-only segments are skipped.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    segment_spans(&chars, chunk_size, overlap)
        .into_iter()
        .filter_map(|(start, end)| {
            let segment: String = chars[start..end].iter().collect();
            let segment = segment.trim();
            (!segment.is_empty()).then(|| segment.to_string())
        })
        .collect()
}

/// The `[start, end)` character ranges [`chunk_text`] cuts, before trimming.
///
/// The first range starts at 0, each range starts no later than the previous one
/// ends, and the last range ends at `chars.len()`. An `overlap` not smaller than
/// `chunk_size` is reduced to `chunk_size - 1`.
pub fn segment_spans(chars: &[char], chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = chars.len();
    if len == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(chunk_size - 1);

    let mut spans = Vec::new();
    let mut start = 0;
    while start < len {
        let mut end = start + chunk_size;
        if end < len {
            if let Some(offset) =
                (overlap + 1..chunk_size).rev().find(|&o| chars[start + o].is_whitespace())
            {
                end = start + offset;
            }
        }
        spans.push((start, end.min(len)));
        start = end - overlap;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PatientRecord {
        PatientRecord {
            id: "p-42".into(),
            user_id: Some("u-42".into()),
            first_name: Some("Marie".into()),
            last_name: Some("Curie".into()),
            age: Some(67),
            gender: Some("F".into()),
            height_cm: Some(165),
            weight_kg: Some(60),
            tremblements: true,
            rigidite: true,
            bradykinesie: true,
            instabilite: true,
            depression_anxiete: true,
            observations: Some("Tremblement de repos de la main droite. ".repeat(30)),
            ..Default::default()
        }
    }

    #[test]
    fn every_chunk_names_the_patient() {
        let chunks = create_patient_chunks(&record(), &Prediction::Unavailable);
        assert!(chunks.len() > 6);
        for c in &chunks {
            assert!(!c.content.is_empty());
            assert!(c.content.contains("p-42"), "{} lacks id", c.kind);
            assert_eq!(c.patient_name, "Marie Curie");
        }
        assert_eq!(chunks[0].kind, ChunkKind::PersonalInfo);
        assert_eq!(chunks.last().unwrap().kind, ChunkKind::PredictionSummary);
        assert!(chunks
            .iter()
            .any(|c| c.kind == ChunkKind::FreeTextSegment(2)));
    }

    #[test]
    fn synthesis_raises_alerts() {
        let chunks = create_patient_chunks(&record(), &Prediction::Unavailable);
        let synthesis = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::ClinicalSynthesis)
            .unwrap();
        assert!(synthesis.content.contains("5/15"));
        assert!(synthesis.content.contains("Troubles moteurs sévères: OUI ⚠️"));
        assert!(synthesis.content.contains("Impact psychologique: OUI ⚠️"));
        assert!(synthesis.content.contains("Risque de chute: OUI ⚠️"));
    }

    #[test]
    fn motor_chunk_counts_present_symptoms() {
        let chunks = create_patient_chunks(&record(), &Prediction::Unavailable);
        let motor = &chunks[2];
        assert_eq!(motor.kind, ChunkKind::MotorSymptoms);
        assert!(motor.content.contains("Gravité motrice: 4/7 symptômes présents"));
        assert!(motor.content.contains("✓ Tremblements au repos"));
        assert!(motor.content.contains("✗ Micrographie (écriture petite)"));
    }

    #[test]
    fn prediction_chunk_tailors_recommendations() {
        let sick = Prediction::Available {
            label: "Malade".into(),
            score: Some(0.91),
            confidence: Some(0.91),
        };
        let chunks = create_patient_chunks(&record(), &sick);
        let last = chunks.last().unwrap();
        assert!(last.content.contains("Malade (confiance: 0.91)"));
        assert!(last.content.contains("Kinésithérapie"));

        let chunks = create_patient_chunks(&record(), &Prediction::Unavailable);
        let last = chunks.last().unwrap();
        assert!(last.content.contains("Aucune analyse CNN disponible"));
        assert!(last.content.contains("Pas de signes évidents"));
    }

    #[test]
    fn sparse_record_uses_placeholders() {
        let bare = PatientRecord {
            id: "p-1".into(),
            ..Default::default()
        };
        let chunks = create_patient_chunks(&bare, &Prediction::Unavailable);
        assert_eq!(chunks.len(), 6);
        assert!(chunks[0].content.contains("Nom complet: N/A N/A"));
        assert!(chunks[1].content.contains("IMC: N/A"));
        assert!(chunks[1].content.contains("Aucun historique enregistré"));
    }

    #[test]
    fn bmi_is_rounded() {
        assert_eq!(body_mass_index(Some(165), Some(60)), Some(22.04));
        assert_eq!(body_mass_index(None, Some(60)), None);
        assert_eq!(body_mass_index(Some(0), Some(60)), None);
    }

    #[test]
    fn chunk_text_cuts_on_whitespace() {
        let text = "aaaa bbbb cccc dddd";
        let parts = chunk_text(text, 10, 2);
        assert_eq!(parts[0], "aaaa bbbb");
        assert!(parts.iter().all(|p| p.chars().count() <= 10));
        assert!(parts.last().unwrap().ends_with("dddd"));
    }

    #[test]
    fn chunk_text_counts_characters_not_bytes() {
        let text = "é".repeat(12);
        let parts = chunk_text(&text, 5, 1);
        assert_eq!(parts[0].chars().count(), 5);
    }

    #[test]
    fn chunk_text_edge_cases() {
        assert!(chunk_text("", 500, 50).is_empty());
        assert!(chunk_text("   \n  ", 500, 50).is_empty());
        assert_eq!(chunk_text("court", 500, 50), vec!["court".to_string()]);
    }
}
