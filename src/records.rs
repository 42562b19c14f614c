//! # Record store
//!
//! Read access to the clinical application's SQLite database through Diesel.
//!
//! The pipeline only talks to the [`RecordStore`] trait, so tests and alternative
//! deployments can swap the backing store. All methods are synchronous like the rest of
//! the Diesel code here; async callers wrap them in `tokio::task::spawn_blocking`.
//!
//! ## Date handling
//! Dates of birth are stored as free text by several generations of the application.
//! [`parse_dob`] accepts every format seen in practice and [`age_from_dob`] applies
//! the calendar rule (year difference, minus one before the birthday).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use tracing::*;

use crate::error::StoreError;
use crate::field_resolver::normalize_text;
use crate::models::{
    CaseRecord, InfoPatientRow, MedicalCaseRow, PatientIdentity, PatientRecord, PatientStats,
    Prediction, StoreFingerprint, UserRow,
};
use crate::schema::{info_patients, medical_cases, users};

/// Read-only view of the clinical records.
pub trait RecordStore: Send + Sync {
    /// Every intake record, newest first, with `age` filled from the date of birth
    /// when it was not stored.
    fn load_all(&self) -> Result<Vec<PatientRecord>, StoreError>;

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.load_all()?.len())
    }

    /// Count plus the most recent `updated_at` stamp.
    fn fingerprint(&self) -> Result<StoreFingerprint, StoreError> {
        let records = self.load_all()?;
        Ok(StoreFingerprint {
            count: records.len(),
            last_updated: records.iter().filter_map(|r| r.updated_at.clone()).max(),
        })
    }

    /// Identity of `patient_id`, or of the most recently created patient when `None`.
    fn identity(&self, patient_id: Option<&str>) -> Result<Option<PatientIdentity>, StoreError>;

    /// The flat attribute map of a case, looked up by medical case id or intake id.
    fn case_record(&self, case_id: &str) -> Result<Option<CaseRecord>, StoreError>;

    /// Latest classification result of the patient's user.
    fn latest_prediction(&self, record: &PatientRecord) -> Result<Prediction, StoreError>;

    fn stats(&self) -> Result<PatientStats, StoreError> {
        Ok(PatientStats::from_records(&self.load_all()?))
    }
}

impl PatientStats {
    /// Aggregate over `records`; the mean age covers records with a known age only.
    pub fn from_records(records: &[PatientRecord]) -> Self {
        let ages: Vec<i32> = records.iter().filter_map(|r| r.age).collect();
        let age_moyen = if ages.is_empty() {
            0.0
        } else {
            let mean = ages.iter().map(|a| f64::from(*a)).sum::<f64>() / ages.len() as f64;
            (mean * 10.0).round() / 10.0
        };
        Self {
            total_patients: records.len(),
            avec_tremblements: records.iter().filter(|r| r.tremblements).count(),
            avec_rigidite: records.iter().filter(|r| r.rigidite).count(),
            avec_depression: records.iter().filter(|r| r.depression_anxiete).count(),
            age_moyen,
        }
    }
}

/// [`RecordStore`] over the application's SQLite file.
///
/// A fresh connection is established per call; the application owns the file and may
/// write to it concurrently.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    database_url: String,
}

impl SqliteRecordStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    fn connect(&self) -> Result<SqliteConnection, StoreError> {
        SqliteConnection::establish(&self.database_url).map_err(|e| StoreError::Connection {
            url: self.database_url.clone(),
            message: e.to_string(),
        })
    }

    fn user(conn: &mut SqliteConnection, user_id: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(users::table
            .find(user_id)
            .select(UserRow::as_select())
            .first(conn)
            .optional()?)
    }

    fn latest_case_of_user(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<MedicalCaseRow>, StoreError> {
        Ok(medical_cases::table
            .filter(medical_cases::patient_id.eq(user_id))
            .order(medical_cases::created_at.desc())
            .select(MedicalCaseRow::as_select())
            .first(conn)
            .optional()?)
    }
}

impl RecordStore for SqliteRecordStore {
    fn load_all(&self) -> Result<Vec<PatientRecord>, StoreError> {
        let mut conn = self.connect()?;
        let rows: Vec<InfoPatientRow> = info_patients::table
            .order((info_patients::created_at.desc(), info_patients::id.asc()))
            .select(InfoPatientRow::as_select())
            .load(&mut conn)?;
        let users_by_id: HashMap<String, UserRow> = users::table
            .select(UserRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        let today = Local::now().date_naive();
        let records = rows
            .into_iter()
            .map(|row| {
                let mut record = PatientRecord::from(row);
                if let Some(user) = record.user_id.as_ref().and_then(|id| users_by_id.get(id)) {
                    record.merge_user(user);
                }
                if record.age.is_none() {
                    record.age = record
                        .date_of_birth
                        .as_deref()
                        .and_then(|dob| age_from_dob(dob, today));
                }
                record
            })
            .collect::<Vec<_>>();
        debug!("Loaded {} patient records", records.len());
        Ok(records)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let n: i64 = info_patients::table.count().get_result(&mut conn)?;
        Ok(n.max(0) as usize)
    }

    fn fingerprint(&self) -> Result<StoreFingerprint, StoreError> {
        let mut conn = self.connect()?;
        let n: i64 = info_patients::table.count().get_result(&mut conn)?;
        let last_updated: Option<String> = info_patients::table
            .select(diesel::dsl::max(info_patients::updated_at))
            .first(&mut conn)?;
        Ok(StoreFingerprint {
            count: n.max(0) as usize,
            last_updated,
        })
    }

    fn identity(&self, patient_id: Option<&str>) -> Result<Option<PatientIdentity>, StoreError> {
        let mut conn = self.connect()?;
        let row: Option<InfoPatientRow> = match patient_id {
            Some(id) => info_patients::table
                .find(id)
                .select(InfoPatientRow::as_select())
                .first(&mut conn)
                .optional()?,
            None => info_patients::table
                .order(info_patients::created_at.desc())
                .select(InfoPatientRow::as_select())
                .first(&mut conn)
                .optional()?,
        };
        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = PatientRecord::from(row);
        if let Some(uid) = record.user_id.clone() {
            if let Some(user) = Self::user(&mut conn, &uid)? {
                record.merge_user(&user);
            }
        }
        let age = record.age.or_else(|| {
            record
                .date_of_birth
                .as_deref()
                .and_then(|dob| age_from_dob(dob, Local::now().date_naive()))
        });

        Ok(Some(PatientIdentity {
            patient_id: record.id,
            user_id: record.user_id,
            first_name: record.first_name,
            last_name: record.last_name,
            date_of_birth: record.date_of_birth,
            age,
        }))
    }

    fn case_record(&self, case_id: &str) -> Result<Option<CaseRecord>, StoreError> {
        let mut conn = self.connect()?;

        let case: Option<MedicalCaseRow> = medical_cases::table
            .find(case_id)
            .select(MedicalCaseRow::as_select())
            .first(&mut conn)
            .optional()?;

        let (info, case) = match case {
            Some(case) => {
                let info = match case.patient_id.as_deref() {
                    Some(uid) => info_patients::table
                        .filter(info_patients::user_id.eq(uid))
                        .select(InfoPatientRow::as_select())
                        .first(&mut conn)
                        .optional()?,
                    None => None,
                };
                (info, Some(case))
            }
            None => {
                let info: Option<InfoPatientRow> = info_patients::table
                    .find(case_id)
                    .select(InfoPatientRow::as_select())
                    .first(&mut conn)
                    .optional()?;
                let Some(info) = info else {
                    return Ok(None);
                };
                let case = match info.user_id.as_deref() {
                    Some(uid) => Self::latest_case_of_user(&mut conn, uid)?,
                    None => None,
                };
                (Some(info), case)
            }
        };

        let mut record = info.map(PatientRecord::from);
        if let Some(r) = record.as_mut() {
            if let Some(uid) = r.user_id.clone() {
                if let Some(user) = Self::user(&mut conn, &uid)? {
                    r.merge_user(&user);
                }
            }
        }

        Ok(Some(build_case_record(case_id, record.as_ref(), case.as_ref())))
    }

    fn latest_prediction(&self, record: &PatientRecord) -> Result<Prediction, StoreError> {
        let Some(uid) = record.user_id.as_deref() else {
            return Ok(Prediction::Unavailable);
        };
        let mut conn = self.connect()?;
        Ok(match Self::latest_case_of_user(&mut conn, uid)? {
            Some(case) => Prediction::from_case(&case),
            None => Prediction::Unavailable,
        })
    }
}

/// Assemble the flat attribute map of a case.
///
/// Intake columns come first, case columns override them, and report sections are
/// parsed out of `neurologist_report`. The whole report is kept as `free_text_report`.
pub fn build_case_record(
    case_id: &str,
    record: Option<&PatientRecord>,
    case: Option<&MedicalCaseRow>,
) -> CaseRecord {
    let mut attributes = BTreeMap::new();

    if let Some(record) = record {
        if let Ok(Value::Object(map)) = serde_json::to_value(record) {
            for (key, value) in map {
                let text = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                attributes.insert(key, text);
            }
        }
        attributes.remove("id");
        attributes.insert("patient_id".to_string(), record.id.clone());
    }

    if let Some(case) = case {
        let columns = [
            ("description", &case.description),
            ("status", &case.status),
            ("cnn_prediction", &case.cnn_prediction),
            ("neurologist_report", &case.neurologist_report),
            ("created_at", &case.created_at),
            ("updated_at", &case.updated_at),
        ];
        for (key, value) in columns {
            if let Some(v) = value {
                attributes.insert(key.to_string(), v.clone());
            }
        }
        if let Some(n) = case.cnn_prediction_num {
            attributes.insert("cnn_prediction_num".to_string(), n.to_string());
        }
        if let Some(c) = case.cnn_confidence {
            attributes.insert("cnn_confidence".to_string(), c.to_string());
        }
        if let Some(report) = case.neurologist_report.as_deref() {
            for (field, text) in parse_report_sections(report) {
                attributes.insert(field.to_string(), text);
            }
            attributes.insert("free_text_report".to_string(), report.to_string());
        }
    }

    CaseRecord {
        case_id: case_id.to_string(),
        attributes,
    }
}

const REPORT_HEADINGS: &[(&str, &str)] = &[
    ("resume clinique", "clinical_summary"),
    ("examen clinique", "exam_findings"),
    ("score updrs", "updrs_score"),
    ("conclusion / diagnostic", "diagnosis"),
    ("conclusion", "diagnosis"),
    ("diagnostic", "diagnosis"),
    ("examens complementaires", "complementary_exams"),
    ("recommandations", "recommendations"),
    ("plan de suivi", "follow_up_plan"),
    ("notes complementaires", "additional_notes"),
];

/// Split a combined report (`Heading:\nbody\n\nHeading:\nbody`) into canonical fields.
///
/// Text before the first recognised heading is ignored.
pub fn parse_report_sections(report: &str) -> Vec<(&'static str, String)> {
    let mut sections: Vec<(&'static str, String)> = Vec::new();
    let mut current: Option<(&'static str, Vec<&str>)> = None;

    for line in report.lines() {
        let trimmed = line.trim();
        let heading = trimmed
            .strip_suffix(':')
            .map(|h| normalize_text(h.trim()))
            .and_then(|h| {
                REPORT_HEADINGS
                    .iter()
                    .find(|(label, _)| *label == h)
                    .map(|(_, field)| *field)
            });

        match heading {
            Some(field) => {
                if let Some((f, body)) = current.take() {
                    sections.push((f, body.join("\n").trim().to_string()));
                }
                current = Some((field, Vec::new()));
            }
            None => {
                if let Some((_, body)) = current.as_mut() {
                    body.push(line);
                }
            }
        }
    }
    if let Some((f, body)) = current {
        sections.push((f, body.join("\n").trim().to_string()));
    }

    sections.retain(|(_, body)| !body.is_empty());
    sections
}

/// Parse a stored date of birth.
///
/// Accepts ISO-8601 (with `T` and an optional timezone suffix), `%Y-%m-%d`,
/// `%d-%m-%Y`, `%d/%m/%Y`, `%Y/%m/%d`, `%Y-%m-%d %H:%M:%S%.f`, and a bare
/// four-digit year (taken as 1 January).
pub fn parse_dob(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    // Other ISO timestamps: drop the timezone offset of the time part and the `T`
    // separator.
    let mut iso = s.replace('T', " ");
    if let Some(space) = iso.find(' ') {
        if let Some(offset) = iso[space..].find(['+', '-', 'Z']) {
            iso.truncate(space + offset);
        }
    }
    let iso = iso.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(iso, fmt) {
            return Some(dt.date());
        }
    }

    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i32>().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    }

    None
}

/// Age in whole years on `today`, or `None` when the date is unparseable or in the future.
pub fn age_from_dob(dob: &str, today: NaiveDate) -> Option<i32> {
    let born = parse_dob(dob)?;
    if born > today {
        return None;
    }
    let before_birthday = (today.month(), today.day()) < (born.month(), born.day());
    Some(today.year() - born.year() - i32::from(before_birthday))
}
