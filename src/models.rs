//! # Record models
//!
//! Two layers live here:
//!
//! - Diesel row structs ([`InfoPatientRow`], [`UserRow`], [`MedicalCaseRow`]) that map
//!   one-to-one onto the tables declared in [`crate::schema`].
//! - Typed domain records handed to the rest of the pipeline: [`PatientRecord`],
//!   [`PatientIdentity`], [`Prediction`], [`CaseRecord`], [`PatientStats`] and
//!   [`StoreFingerprint`].
//!
//! Rows are never written by this crate. A [`PatientRecord`] is a read-only copy taken
//! at load time, so a rebuild works on a consistent set even while the application
//! keeps editing the store.

use std::collections::BTreeMap;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// One row of `info_patients`.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::info_patients)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InfoPatientRow {
    pub id: String,
    pub user_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<i32>,
    pub medical_history: Option<String>,
    pub emergency_contact: Option<String>,
    pub autres_maladies: Option<bool>,
    pub details_autres_maladies: Option<String>,
    pub tremblements: Option<bool>,
    pub rigidite: Option<bool>,
    pub bradykinesie: Option<bool>,
    pub difficulte_marche: Option<bool>,
    pub instabilite: Option<bool>,
    pub expression_faciale_reduite: Option<bool>,
    pub micrographie: Option<bool>,
    pub fatigue: Option<bool>,
    pub troubles_sommeil: Option<bool>,
    pub troubles_cognitifs: Option<bool>,
    pub depression_anxiete: Option<bool>,
    pub perte_odorat: Option<bool>,
    pub constipation: Option<bool>,
    pub problemes_urinaires: Option<bool>,
    pub douleurs: Option<bool>,
    pub observations: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// The columns of `users` needed to resolve a display name.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserRow {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// One row of `medical_cases`. `patient_id` references `users.id`.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::medical_cases)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MedicalCaseRow {
    pub id: String,
    pub patient_id: Option<String>,
    pub neurologist_id: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub cnn_prediction: Option<String>,
    pub cnn_prediction_num: Option<f64>,
    pub cnn_confidence: Option<f64>,
    pub report_pdf: Option<String>,
    pub neurologist_report: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A patient's intake record, with the user's names merged in when known.
///
/// Every field is optional except `id`. `age` holds the stored age, or the one
/// computed from `date_of_birth` when the column was empty.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PatientRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<i32>,
    pub medical_history: Option<String>,
    pub emergency_contact: Option<String>,
    pub other_conditions: bool,
    pub other_conditions_details: Option<String>,

    pub tremblements: bool,
    pub rigidite: bool,
    pub bradykinesie: bool,
    pub difficulte_marche: bool,
    pub instabilite: bool,
    pub expression_faciale_reduite: bool,
    pub micrographie: bool,

    pub fatigue: bool,
    pub troubles_sommeil: bool,
    pub troubles_cognitifs: bool,
    pub depression_anxiete: bool,
    pub perte_odorat: bool,
    pub constipation: bool,
    pub problemes_urinaires: bool,
    pub douleurs: bool,

    pub observations: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl From<InfoPatientRow> for PatientRecord {
    fn from(row: InfoPatientRow) -> Self {
        let flag = |v: Option<bool>| v.unwrap_or(false);
        Self {
            id: row.id,
            user_id: row.user_id,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            date_of_birth: row.date_of_birth,
            age: row.age,
            gender: row.gender,
            address: row.address,
            height_cm: row.height_cm,
            weight_kg: row.weight_kg,
            medical_history: row.medical_history,
            emergency_contact: row.emergency_contact,
            other_conditions: flag(row.autres_maladies),
            other_conditions_details: row.details_autres_maladies,
            tremblements: flag(row.tremblements),
            rigidite: flag(row.rigidite),
            bradykinesie: flag(row.bradykinesie),
            difficulte_marche: flag(row.difficulte_marche),
            instabilite: flag(row.instabilite),
            expression_faciale_reduite: flag(row.expression_faciale_reduite),
            micrographie: flag(row.micrographie),
            fatigue: flag(row.fatigue),
            troubles_sommeil: flag(row.troubles_sommeil),
            troubles_cognitifs: flag(row.troubles_cognitifs),
            depression_anxiete: flag(row.depression_anxiete),
            perte_odorat: flag(row.perte_odorat),
            constipation: flag(row.constipation),
            problemes_urinaires: flag(row.problemes_urinaires),
            douleurs: flag(row.douleurs),
            observations: row.observations,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PatientRecord {
    /// Prefer the user's names over the ones typed into the intake form.
    pub fn merge_user(&mut self, user: &UserRow) {
        if let Some(first) = non_blank(user.first_name.as_deref()) {
            self.first_name = Some(first.to_string());
        }
        if let Some(last) = non_blank(user.last_name.as_deref()) {
            self.last_name = Some(last.to_string());
        }
    }

    /// `"First Last"`, with `N/A` standing in for a missing part.
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            non_blank(self.first_name.as_deref()).unwrap_or("N/A"),
            non_blank(self.last_name.as_deref()).unwrap_or("N/A")
        )
    }

    /// Motor flags in presentation order.
    pub fn motor_flags(&self) -> [(&'static str, bool); 7] {
        [
            ("Tremblements au repos", self.tremblements),
            ("Rigidité musculaire", self.rigidite),
            ("Bradykinésie (lenteur des mouvements)", self.bradykinesie),
            ("Difficulté à la marche", self.difficulte_marche),
            ("Instabilité posturale", self.instabilite),
            ("Hypomimie (expression faciale réduite)", self.expression_faciale_reduite),
            ("Micrographie (écriture petite)", self.micrographie),
        ]
    }

    /// Non-motor flags in presentation order.
    pub fn non_motor_flags(&self) -> [(&'static str, bool); 8] {
        [
            ("Fatigue chronique", self.fatigue),
            ("Troubles du sommeil", self.troubles_sommeil),
            ("Troubles cognitifs", self.troubles_cognitifs),
            ("Dépression et/ou anxiété", self.depression_anxiete),
            ("Hyposmie (perte d'odorat)", self.perte_odorat),
            ("Constipation", self.constipation),
            ("Problèmes urinaires", self.problemes_urinaires),
            ("Douleurs", self.douleurs),
        ]
    }

    pub fn motor_count(&self) -> usize {
        self.motor_flags().iter().filter(|(_, on)| *on).count()
    }

    pub fn non_motor_count(&self) -> usize {
        self.non_motor_flags().iter().filter(|(_, on)| *on).count()
    }
}

/// Who a patient is, as resolved by joining the intake record with its user.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PatientIdentity {
    pub patient_id: String,
    pub user_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub age: Option<i32>,
}

impl PatientIdentity {
    /// `"First Last"` with empty strings for missing parts.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
    }
}

/// Latest classification result for a patient.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Prediction {
    Available {
        label: String,
        score: Option<f64>,
        confidence: Option<f64>,
    },
    Unavailable,
}

impl Prediction {
    pub const POSITIVE_LABEL: &'static str = "Malade";
    pub const NEGATIVE_LABEL: &'static str = "Sain";
    pub const UNKNOWN_LABEL: &'static str = "Analyse inconnue";

    /// Derive the prediction of one medical case.
    ///
    /// The stored label wins. A legacy `Label:0.97` label is split into label and
    /// confidence. Without a label the numeric score decides (`>= 0.5` is positive).
    pub fn from_case(case: &MedicalCaseRow) -> Self {
        let mut confidence = case.cnn_confidence;
        let label = match non_blank(case.cnn_prediction.as_deref()) {
            Some(raw) => match raw.rsplit_once(':') {
                Some((head, tail)) if tail.trim().parse::<f64>().is_ok() => {
                    if confidence.is_none() {
                        confidence = tail.trim().parse::<f64>().ok();
                    }
                    head.trim().to_string()
                }
                _ => raw.to_string(),
            },
            None => match case.cnn_prediction_num {
                Some(n) if n >= 0.5 => Self::POSITIVE_LABEL.to_string(),
                Some(_) => Self::NEGATIVE_LABEL.to_string(),
                None => Self::UNKNOWN_LABEL.to_string(),
            },
        };
        Prediction::Available {
            label,
            score: case.cnn_prediction_num,
            confidence,
        }
    }

    /// Human-readable verdict, e.g. `Malade (confiance: 0.93)`.
    pub fn summary(&self) -> String {
        match self {
            Prediction::Available {
                label,
                confidence: Some(c),
                ..
            } => format!("{label} (confiance: {c:.2})"),
            Prediction::Available { label, .. } => label.clone(),
            Prediction::Unavailable => "Aucune analyse CNN disponible".to_string(),
        }
    }

    /// Whether the label is the positive one, compared case-insensitively.
    pub fn is_positive(&self) -> bool {
        match self {
            Prediction::Available { label, .. } => {
                label.trim().eq_ignore_ascii_case(Self::POSITIVE_LABEL)
            }
            Prediction::Unavailable => false,
        }
    }
}

/// Flat attribute map of one case: the patient's intake columns, the case columns
/// and the report sections parsed out of `neurologist_report`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CaseRecord {
    pub case_id: String,
    pub attributes: BTreeMap<String, String>,
}

impl CaseRecord {
    /// A present, non-blank attribute.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Aggregate counts over all intake records.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PatientStats {
    pub total_patients: usize,
    pub avec_tremblements: usize,
    pub avec_rigidite: usize,
    pub avec_depression: usize,
    pub age_moyen: f64,
}

/// Cheap summary of the store used to decide whether the index is stale.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreFingerprint {
    pub count: usize,
    pub last_updated: Option<String>,
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(label: Option<&str>, num: Option<f64>, conf: Option<f64>) -> MedicalCaseRow {
        MedicalCaseRow {
            id: "c1".into(),
            patient_id: Some("u1".into()),
            neurologist_id: None,
            description: None,
            status: None,
            cnn_prediction: label.map(str::to_string),
            cnn_prediction_num: num,
            cnn_confidence: conf,
            report_pdf: None,
            neurologist_report: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn prediction_prefers_stored_label() {
        let p = Prediction::from_case(&case(Some("Sain"), Some(0.9), Some(0.812)));
        assert_eq!(p.summary(), "Sain (confiance: 0.81)");
        assert!(!p.is_positive());
    }

    #[test]
    fn prediction_falls_back_to_score() {
        let p = Prediction::from_case(&case(None, Some(0.5), None));
        assert_eq!(p.summary(), "Malade");
        assert!(p.is_positive());

        let p = Prediction::from_case(&case(None, Some(0.49), None));
        assert_eq!(p.summary(), "Sain");

        let p = Prediction::from_case(&case(None, None, None));
        assert_eq!(p.summary(), "Analyse inconnue");
    }

    #[test]
    fn prediction_accepts_legacy_label_with_confidence() {
        let p = Prediction::from_case(&case(Some("Malade:0.97"), None, None));
        assert_eq!(p.summary(), "Malade (confiance: 0.97)");
        assert!(p.is_positive());
    }

    #[test]
    fn positivity_reads_the_label_not_the_summary() {
        let p = Prediction::from_case(&case(Some("Non Malade"), Some(0.2), None));
        assert!(!p.is_positive());

        let p = Prediction::from_case(&case(Some("malade"), None, None));
        assert!(p.is_positive());
    }

    #[test]
    fn unavailable_prediction_summary() {
        assert_eq!(
            Prediction::Unavailable.summary(),
            "Aucune analyse CNN disponible"
        );
        assert!(!Prediction::Unavailable.is_positive());
    }

    #[test]
    fn display_name_uses_placeholders() {
        let mut r = PatientRecord {
            id: "p1".into(),
            first_name: Some("Jean".into()),
            ..Default::default()
        };
        assert_eq!(r.display_name(), "Jean N/A");

        r.merge_user(&UserRow {
            id: "u1".into(),
            email: None,
            role: None,
            first_name: Some("Jeanne".into()),
            last_name: Some(" ".into()),
        });
        assert_eq!(r.display_name(), "Jeanne N/A");
    }
}
