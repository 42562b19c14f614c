use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tempfile::TempDir;

use medirag::error::StoreError;
use medirag::models::Prediction;
use medirag::records::{RecordStore, SqliteRecordStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE users (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT,
        role TEXT,
        first_name TEXT,
        last_name TEXT
    )",
    "CREATE TABLE info_patients (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT REFERENCES users(id),
        first_name TEXT,
        last_name TEXT,
        phone TEXT,
        date_of_birth TEXT,
        age INTEGER,
        gender TEXT,
        address TEXT,
        height_cm INTEGER,
        weight_kg INTEGER,
        medical_history TEXT,
        emergency_contact TEXT,
        autres_maladies BOOLEAN,
        details_autres_maladies TEXT,
        tremblements BOOLEAN,
        rigidite BOOLEAN,
        bradykinesie BOOLEAN,
        difficulte_marche BOOLEAN,
        instabilite BOOLEAN,
        expression_faciale_reduite BOOLEAN,
        micrographie BOOLEAN,
        fatigue BOOLEAN,
        troubles_sommeil BOOLEAN,
        troubles_cognitifs BOOLEAN,
        depression_anxiete BOOLEAN,
        perte_odorat BOOLEAN,
        constipation BOOLEAN,
        problemes_urinaires BOOLEAN,
        douleurs BOOLEAN,
        observations TEXT,
        created_at TEXT,
        updated_at TEXT
    )",
    "CREATE TABLE medical_cases (
        id TEXT PRIMARY KEY NOT NULL,
        patient_id TEXT REFERENCES users(id),
        neurologist_id TEXT,
        description TEXT,
        status TEXT,
        cnn_prediction TEXT,
        cnn_prediction_num REAL,
        cnn_confidence REAL,
        report_pdf TEXT,
        neurologist_report TEXT,
        created_at TEXT,
        updated_at TEXT
    )",
];

const FIXTURES: &[&str] = &[
    "INSERT INTO users (id, email, role, first_name, last_name) VALUES
        ('u1', 'marie@example.org', 'patient', 'Marie', 'Curie'),
        ('u2', 'louis@example.org', 'patient', '', '')",
    "INSERT INTO info_patients
        (id, user_id, first_name, last_name, date_of_birth, age, gender,
         tremblements, rigidite, depression_anxiete, observations, created_at, updated_at)
     VALUES
        ('p1', 'u1', 'M.', 'C.', '1957-03-09', NULL, 'F', 1, 1, 0,
         'Tremblement de repos', '2024-01-01 09:00:00', '2024-01-05 09:00:00'),
        ('p2', 'u2', 'Louis', 'Pasteur', NULL, 72, 'M', 0, 0, 1,
         NULL, '2024-02-01 09:00:00', '2024-02-01 09:00:00')",
    "INSERT INTO medical_cases
        (id, patient_id, status, cnn_prediction, cnn_prediction_num, cnn_confidence,
         neurologist_report, created_at)
     VALUES
        ('c-old', 'u1', 'closed', 'Sain', 0.2, 0.8, NULL, '2023-12-01 09:00:00'),
        ('c1', 'u1', 'open', NULL, 0.82, 0.9,
         'Résumé clinique:\nTremblement unilatéral droit\n\nConclusion / Diagnostic:\nParkinson probable',
         '2024-01-10 09:00:00')",
];

fn seeded_store() -> (TempDir, SqliteRecordStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.db");
    let url = path.to_str().unwrap().to_string();
    let mut conn = SqliteConnection::establish(&url).unwrap();
    for statement in SCHEMA.iter().chain(FIXTURES) {
        diesel::sql_query(*statement).execute(&mut conn).unwrap();
    }
    (dir, SqliteRecordStore::new(url))
}

#[test]
fn load_all_is_newest_first_with_user_names() {
    let (_dir, store) = seeded_store();
    let records = store.load_all().unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p2", "p1"]);

    let curie = &records[1];
    assert_eq!(curie.first_name.as_deref(), Some("Marie"));
    assert_eq!(curie.last_name.as_deref(), Some("Curie"));
    assert!(curie.tremblements);
    assert!(curie.age.unwrap() >= 67);

    // Blank user names do not override the intake record.
    assert_eq!(records[0].first_name.as_deref(), Some("Louis"));
}

#[test]
fn fingerprint_and_stats() {
    let (_dir, store) = seeded_store();
    let fp = store.fingerprint().unwrap();
    assert_eq!(fp.count, 2);
    assert_eq!(fp.last_updated.as_deref(), Some("2024-02-01 09:00:00"));
    assert_eq!(store.count().unwrap(), 2);

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_patients, 2);
    assert_eq!(stats.avec_tremblements, 1);
    assert_eq!(stats.avec_rigidite, 1);
    assert_eq!(stats.avec_depression, 1);
}

#[test]
fn identity_defaults_to_latest_patient() {
    let (_dir, store) = seeded_store();
    let latest = store.identity(None).unwrap().unwrap();
    assert_eq!(latest.patient_id, "p2");
    assert_eq!(latest.age, Some(72));

    let curie = store.identity(Some("p1")).unwrap().unwrap();
    assert_eq!(curie.full_name(), "Marie Curie");
    assert_eq!(curie.date_of_birth.as_deref(), Some("1957-03-09"));

    assert!(store.identity(Some("p404")).unwrap().is_none());
}

#[test]
fn case_record_by_case_id_parses_report_sections() {
    let (_dir, store) = seeded_store();
    let case = store.case_record("c1").unwrap().unwrap();
    assert_eq!(case.case_id, "c1");
    assert_eq!(case.value("patient_id"), Some("p1"));
    assert_eq!(case.value("first_name"), Some("Marie"));
    assert_eq!(case.value("clinical_summary"), Some("Tremblement unilatéral droit"));
    assert_eq!(case.value("diagnosis"), Some("Parkinson probable"));
    assert!(case.value("free_text_report").unwrap().starts_with("Résumé clinique:"));
    assert_eq!(case.value("recommendations"), None);
}

#[test]
fn case_record_by_intake_id_uses_latest_case() {
    let (_dir, store) = seeded_store();
    let case = store.case_record("p1").unwrap().unwrap();
    assert_eq!(case.value("status"), Some("open"));
    assert_eq!(case.value("diagnosis"), Some("Parkinson probable"));

    let bare = store.case_record("p2").unwrap().unwrap();
    assert_eq!(bare.value("last_name"), Some("Pasteur"));
    assert_eq!(bare.value("diagnosis"), None);

    assert!(store.case_record("nobody").unwrap().is_none());
}

#[test]
fn latest_prediction_uses_newest_case() {
    let (_dir, store) = seeded_store();
    let records = store.load_all().unwrap();

    let curie = store.latest_prediction(&records[1]).unwrap();
    assert!(curie.is_positive());
    assert_eq!(curie.summary(), "Malade (confiance: 0.90)");

    let pasteur = store.latest_prediction(&records[0]).unwrap();
    assert_eq!(pasteur, Prediction::Unavailable);
}

#[test]
fn unreachable_database_is_an_error() {
    let store = SqliteRecordStore::new("/nonexistent/dir/clinic.db");
    assert!(matches!(store.load_all(), Err(StoreError::Connection { .. })));
}
