//! Loads workspace rows into the shapes the calculations consume.

use crate::calc::{CalcError, Grade, SubjectResult};
use crate::consistency::{timestamp_key, KnownEntities, StoredResult};
use crate::report::{RosterStudent, Subject};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ExamRow {
    pub id: String,
    pub name: String,
    pub academic_year_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub name: String,
}

pub fn class_name(conn: &Connection, class_id: &str) -> Result<Option<String>, CalcError> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(CalcError::db)
}

pub fn find_exam(conn: &Connection, exam_id: &str) -> Result<Option<ExamRow>, CalcError> {
    conn.query_row(
        "SELECT id, name, academic_year_id FROM exams WHERE id = ?",
        [exam_id],
        |r| {
            Ok(ExamRow {
                id: r.get(0)?,
                name: r.get(1)?,
                academic_year_id: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(CalcError::db)
}

pub fn find_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, CalcError> {
    conn.query_row(
        "SELECT id, class_id, name FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(CalcError::db)
}

pub fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, CalcError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(CalcError::db)?;
    Ok(found.is_some())
}

pub fn load_catalog(conn: &Connection) -> Result<Vec<Subject>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT id, code, name, is_core FROM subjects ORDER BY sort_order, code")
        .map_err(CalcError::db)?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                is_core: r.get::<_, i64>(3)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    Ok(subjects)
}

/// Active students of a class in roster order, with their optional-subject
/// selections. Students whose selections were never recorded get `None`.
pub fn load_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterStudent>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, subjects_recorded
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(CalcError::db)?;
    let rows: Vec<(String, String, bool)> = stmt
        .query_map([class_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get::<_, i64>(2)? != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    let mut sel_stmt = conn
        .prepare(
            "SELECT ss.student_id, ss.subject_id
             FROM student_subjects ss
             JOIN students s ON s.id = ss.student_id
             WHERE s.class_id = ?",
        )
        .map_err(CalcError::db)?;
    let mut selections: HashMap<String, Vec<String>> = HashMap::new();
    let pairs = sel_stmt
        .query_map([class_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    for (student_id, subject_id) in pairs {
        selections.entry(student_id).or_default().push(subject_id);
    }

    Ok(rows
        .into_iter()
        .map(|(id, name, recorded)| {
            let selected_subject_ids = if recorded {
                Some(selections.remove(&id).unwrap_or_default())
            } else {
                None
            };
            RosterStudent {
                id,
                name,
                selected_subject_ids,
            }
        })
        .collect())
}

fn normalize_points(raw: Option<i64>) -> Option<u8> {
    raw.and_then(|p| u8::try_from(p).ok()).filter(|p| *p <= 5)
}

fn text_of(v: ValueRef<'_>) -> Option<String> {
    match v {
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

/// The results columns are untyped; text that does not read as a number
/// becomes `None` instead of failing the whole query.
fn lenient_f64(v: ValueRef<'_>) -> Option<f64> {
    let n = match v {
        ValueRef::Integer(i) => i as f64,
        ValueRef::Real(f) => f,
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok()?,
        ValueRef::Null | ValueRef::Blob(_) => return None,
    };
    n.is_finite().then_some(n)
}

fn lenient_i64(v: ValueRef<'_>) -> Option<i64> {
    match v {
        ValueRef::Integer(i) => Some(i),
        _ => lenient_f64(v)
            .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
            .map(|f| f as i64),
    }
}

/// Results of one exam, oldest first by parsed `updated_at` so later edits
/// win when the report collapses repeated rows. Equal or unparseable
/// timestamps fall back to insertion order, the same order the duplicate
/// check's `latest` policy uses. Rows missing any identifier are skipped
/// here; the consistency check reports them.
pub fn load_exam_results(conn: &Connection, exam_id: &str) -> Result<Vec<SubjectResult>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, exam_id, subject_id, class_id, academic_year_id,
                    marks_obtained, grade, points, comment, COALESCE(updated_at, created_at)
             FROM results
             WHERE exam_id = ?
               AND student_id IS NOT NULL AND student_id <> ''
               AND subject_id IS NOT NULL AND subject_id <> ''
             ORDER BY rowid",
        )
        .map_err(CalcError::db)?;
    let mut rows: Vec<(SubjectResult, Option<String>)> = stmt
        .query_map([exam_id], |r| {
            let grade = text_of(r.get_ref(7)?);
            let result = SubjectResult {
                id: r.get(0)?,
                student_id: r.get(1)?,
                exam_id: r.get(2)?,
                subject_id: r.get(3)?,
                class_id: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                academic_year_id: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                marks_obtained: lenient_f64(r.get_ref(6)?),
                grade: grade.as_deref().and_then(Grade::parse),
                points: normalize_points(lenient_i64(r.get_ref(8)?)),
                comment: text_of(r.get_ref(9)?),
            };
            Ok((result, text_of(r.get_ref(10)?)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    rows.sort_by_key(|(_, updated_at)| timestamp_key(updated_at.as_deref()));
    Ok(rows.into_iter().map(|(result, _)| result).collect())
}

pub fn load_stored_results(
    conn: &Connection,
    exam_id: Option<&str>,
) -> Result<Vec<StoredResult>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, exam_id, subject_id, class_id, academic_year_id,
                    marks_obtained, grade, points, COALESCE(updated_at, created_at)
             FROM results
             WHERE (?1 IS NULL OR exam_id = ?1)
             ORDER BY rowid",
        )
        .map_err(CalcError::db)?;
    let rows = stmt
        .query_map([exam_id], |r| {
            Ok(StoredResult {
                id: r.get(0)?,
                student_id: r.get(1)?,
                exam_id: r.get(2)?,
                subject_id: r.get(3)?,
                class_id: r.get(4)?,
                academic_year_id: r.get(5)?,
                marks_obtained: lenient_f64(r.get_ref(6)?),
                grade: text_of(r.get_ref(7)?),
                points: lenient_i64(r.get_ref(8)?),
                updated_at: text_of(r.get_ref(9)?),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    Ok(rows)
}

fn load_ids(conn: &Connection, sql: &str) -> Result<HashSet<String>, CalcError> {
    let mut stmt = conn.prepare(sql).map_err(CalcError::db)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(CalcError::db)?;
    Ok(ids)
}

pub fn load_known_entities(conn: &Connection) -> Result<KnownEntities, CalcError> {
    Ok(KnownEntities {
        students: load_ids(conn, "SELECT id FROM students")?,
        exams: load_ids(conn, "SELECT id FROM exams")?,
        subjects: load_ids(conn, "SELECT id FROM subjects")?,
    })
}
