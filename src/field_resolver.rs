//! # Field resolution
//!
//! The fast path in front of retrieval. It recognises two kinds of question:
//!
//! - **form fields**: a French vocabulary maps phrases such as `résumé clinique` or
//!   `conclusion` to canonical report fields. Stored values are returned verbatim and
//!   missing ones are produced by a constrained single-field generation.
//! - **identity**: questions asking for the patient's name or age, answered from the
//!   record store with a templated sentence.
//!
//! Matching runs on [`normalize_text`] output (NFD, combining marks stripped,
//! lowercase). A vocabulary phrase matches where it starts on a word boundary,
//! each of its words optionally followed by a plural `s` or `x`, so
//! `résumés cliniques` resolves while `suivi` does not match inside `poursuivi`.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::generator::AnswerGenerator;
use crate::models::{CaseRecord, PatientIdentity};

/// Normalised phrase → canonical field.
pub const FIELD_VOCABULARY: &[(&str, &str)] = &[
    ("resume clinique", "clinical_summary"),
    ("resume", "clinical_summary"),
    ("examen clinique", "exam_findings"),
    ("constatations", "exam_findings"),
    ("updrs", "updrs_score"),
    ("score updrs", "updrs_score"),
    ("conclusion", "diagnosis"),
    ("diagnostic", "diagnosis"),
    ("recommandations", "recommendations"),
    ("recommendations", "recommendations"),
    ("examens complementaires", "complementary_exams"),
    ("plan de suivi", "follow_up_plan"),
    ("suivi", "follow_up_plan"),
    ("notes complementaires", "additional_notes"),
    ("rapport complet", "free_text_report"),
    ("rapport", "free_text_report"),
];

/// Every canonical field, in vocabulary order.
pub const CANONICAL_FIELDS: &[&str] = &[
    "clinical_summary",
    "exam_findings",
    "updrs_score",
    "diagnosis",
    "recommendations",
    "complementary_exams",
    "follow_up_plan",
    "additional_notes",
    "free_text_report",
];

/// French heading of a canonical field, as printed in reports.
pub fn field_label(field: &str) -> &str {
    match field {
        "clinical_summary" => "Résumé clinique",
        "exam_findings" => "Examen clinique",
        "updrs_score" => "Score UPDRS",
        "diagnosis" => "Conclusion / Diagnostic",
        "recommendations" => "Recommandations",
        "complementary_exams" => "Examens complémentaires",
        "follow_up_plan" => "Plan de suivi",
        "additional_notes" => "Notes complémentaires",
        "free_text_report" => "Rapport complet",
        other => other,
    }
}

// Identity keywords carry a possessive or interrogative context so aggregate
// questions ("moyenne d'âge des patients", "nom du traitement") go to retrieval.
const NAME_KEYWORDS: &[&str] = &[
    "son nom",
    "son prenom",
    "quel nom",
    "quel prenom",
    "s appelle",
    "nom du patient",
    "nom de la patiente",
    "prenom du patient",
    "prenom de la patiente",
];

const AGE_KEYWORDS: &[&str] = &[
    "son age",
    "quel age",
    "quel est l age",
    "age du patient",
    "age de la patiente",
];

pub const NOT_FIELD_MESSAGE: &str = "Question non reconnue comme champ du formulaire. Exemple: 'Résumé clinique' ou 'Conclusion'.";

pub const NO_IDENTITY_MESSAGE: &str = "Aucune information patient/utilisateur trouvée dans la base.";

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static pattern"));

/// Lowercase `s` and strip its accents (`Résumé` → `resume`).
pub fn normalize_text(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Normalised text reduced to space-separated word tokens, padded with a space
/// on both sides so phrase lookups respect word boundaries.
fn token_text(s: &str) -> String {
    let normalized = normalize_text(s);
    let words = NON_WORD.replace_all(&normalized, " ");
    format!(" {} ", words.trim())
}

fn contains_phrase(tokens: &str, phrase: &str) -> bool {
    tokens.contains(&format!(" {phrase} "))
}

/// `phrase` as a pattern over token text: word-start bounded, every word allowing
/// a plural suffix.
fn phrase_pattern(phrase: &str) -> Regex {
    let words = phrase
        .split_whitespace()
        .map(|w| format!("{}(?:s|x)?", regex::escape(w)))
        .collect::<Vec<_>>()
        .join(" ");
    // Escaped literals joined by spaces always form a valid pattern.
    Regex::new(&format!(r"\b{words}\b")).expect("escaped phrase pattern")
}

static VOCABULARY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    FIELD_VOCABULARY
        .iter()
        .map(|(phrase, field)| (phrase_pattern(phrase), *field))
        .collect()
});

static CANONICAL_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    CANONICAL_FIELDS
        .iter()
        .map(|field| (phrase_pattern(&field.replace('_', " ")), *field))
        .collect()
});

/// Canonical fields a question asks for; empty when it is not a field request.
///
/// Vocabulary phrases are tried first. When none matches, the canonical names
/// themselves (`clinical summary`, `follow up plan`, ...) are accepted.
pub fn requested_fields(query: &str) -> BTreeSet<&'static str> {
    let tokens = token_text(query);
    let matching = |patterns: &[(Regex, &'static str)]| -> BTreeSet<&'static str> {
        patterns
            .iter()
            .filter(|(pattern, _)| pattern.is_match(&tokens))
            .map(|(_, field)| *field)
            .collect()
    };

    let fields = matching(VOCABULARY_PATTERNS.as_slice());
    if fields.is_empty() {
        matching(CANONICAL_PATTERNS.as_slice())
    } else {
        fields
    }
}

/// Which identity attribute a question asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityIntent {
    Name,
    Age,
}

/// Detect a name or age question. Age wins when both are asked.
pub fn identity_intent(query: &str) -> Option<IdentityIntent> {
    let tokens = token_text(query);
    if AGE_KEYWORDS.iter().any(|k| contains_phrase(&tokens, k)) {
        Some(IdentityIntent::Age)
    } else if NAME_KEYWORDS.iter().any(|k| contains_phrase(&tokens, k)) {
        Some(IdentityIntent::Name)
    } else {
        None
    }
}

/// The templated French answer to an identity question.
pub fn identity_sentence(intent: IdentityIntent, identity: &PatientIdentity) -> String {
    let name = identity.full_name();
    match intent {
        IdentityIntent::Name => format!("Le patient s'appelle {name}."),
        IdentityIntent::Age => match (identity.age, identity.date_of_birth.as_deref()) {
            (Some(age), _) => format!("Le patient s'appelle {name} et a {age} ans."),
            (None, Some(dob)) if !dob.trim().is_empty() => {
                format!("Le patient s'appelle {name}. Date de naissance: {dob}.")
            }
            _ => format!("Le patient s'appelle {name}. La date de naissance n'est pas disponible."),
        },
    }
}

/// Fields answering an identity question asked through the form endpoint.
pub fn identity_fields(intent: IdentityIntent, identity: &PatientIdentity) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let put = |fields: &mut BTreeMap<String, String>, key: &str, value: Option<String>| {
        fields.insert(
            key.to_string(),
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| crate::generator::NOT_AVAILABLE.to_string()),
        );
    };
    match intent {
        IdentityIntent::Name => {
            put(&mut fields, "first_name", identity.first_name.clone());
            put(&mut fields, "last_name", identity.last_name.clone());
        }
        IdentityIntent::Age => {
            put(&mut fields, "age", identity.age.map(|a| a.to_string()));
            put(&mut fields, "date_of_birth", identity.date_of_birth.clone());
        }
    }
    fields
}

/// Whether `query` mentions a patient by first or last name.
///
/// Both names must appear when both are known; a single known name must be at least
/// three characters long to count.
pub fn mentions_patient(query: &str, first_name: Option<&str>, last_name: Option<&str>) -> bool {
    let tokens = token_text(query);
    let name_tokens = |name: Option<&str>| {
        name.map(token_text)
            .map(|t| t.trim().to_string())
            .filter(|t| t.len() >= 3)
    };
    match (name_tokens(first_name), name_tokens(last_name)) {
        (Some(f), Some(l)) => contains_phrase(&tokens, &f) && contains_phrase(&tokens, &l),
        (Some(n), None) | (None, Some(n)) => contains_phrase(&tokens, &n),
        (None, None) => false,
    }
}

/// Outcome of a field request.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldResolution {
    Fields(BTreeMap<String, String>),
    NotField,
}

/// Resolves form-field questions against a case.
#[derive(Clone)]
pub struct FieldResolver {
    answers: AnswerGenerator,
}

impl FieldResolver {
    pub fn new(answers: AnswerGenerator) -> Self {
        Self { answers }
    }

    /// Return the requested fields of `case`.
    ///
    /// Present, non-blank values are returned verbatim. Each missing one goes through
    /// the single-field generation, which yields the bare value or `non disponible`.
    pub async fn resolve_field(&self, query: &str, case: &CaseRecord) -> FieldResolution {
        let requested = requested_fields(query);
        if requested.is_empty() {
            return FieldResolution::NotField;
        }

        let mut fields = BTreeMap::new();
        for field in requested {
            let value = match case.value(field) {
                Some(stored) => stored.to_string(),
                None => self.answers.generate_field(case, field).await,
            };
            fields.insert(field.to_string(), value);
        }
        FieldResolution::Fields(fields)
    }
}
