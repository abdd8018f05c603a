use crate::calc::{grade_and_points, Grade};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A result row as it sits in storage. Anything may be missing or stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: String,
    pub student_id: Option<String>,
    pub exam_id: Option<String>,
    pub subject_id: Option<String>,
    pub class_id: Option<String>,
    pub academic_year_id: Option<String>,
    pub marks_obtained: Option<f64>,
    pub grade: Option<String>,
    pub points: Option<i64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct KnownEntities {
    pub students: HashSet<String>,
    pub exams: HashSet<String>,
    pub subjects: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateKeepPolicy {
    /// Keep the most recently updated record; later rows win ties.
    #[default]
    Latest,
    /// Keep the oldest record; earlier rows win ties.
    Earliest,
}

impl DuplicateKeepPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "latest" => Some(Self::Latest),
            "earliest" => Some(Self::Earliest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Earliest => "earliest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub student_id: String,
    pub exam_id: String,
    pub subject_id: String,
    pub result_ids: Vec<String>,
    pub keep_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeMismatch {
    pub result_id: String,
    pub marks_obtained: f64,
    pub stored_grade: Option<String>,
    pub stored_points: Option<i64>,
    pub expected_grade: Grade,
    pub expected_points: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanRef {
    Student,
    Exam,
    Subject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedResult {
    pub result_id: String,
    pub missing: Vec<OrphanRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFields {
    pub result_id: String,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencySummary {
    pub scanned: usize,
    pub duplicate_groups: usize,
    pub redundant_records: usize,
    pub incorrect_grades_or_points: usize,
    pub orphaned: usize,
    pub missing_required_fields: usize,
}

impl ConsistencySummary {
    pub fn is_clean(&self) -> bool {
        self.duplicate_groups == 0
            && self.incorrect_grades_or_points == 0
            && self.orphaned == 0
            && self.missing_required_fields == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub duplicates: Vec<DuplicateGroup>,
    pub incorrect_grades_or_points: Vec<GradeMismatch>,
    pub orphaned: Vec<OrphanedResult>,
    pub missing_required_fields: Vec<MissingFields>,
    pub summary: ConsistencySummary,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Orders stored timestamps by instant, so differing offsets compare
/// correctly. `None` sorts before every parsed value.
pub fn timestamp_key(raw: Option<&str>) -> Option<DateTime<FixedOffset>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
}

fn updated_at_key(r: &StoredResult) -> Option<DateTime<FixedOffset>> {
    timestamp_key(r.updated_at.as_deref())
}

/// Unparseable or missing timestamps count as the oldest.
fn pick_keeper<'a>(members: &[&'a StoredResult], policy: DuplicateKeepPolicy) -> &'a StoredResult {
    let mut best = members[0];
    let mut best_key = updated_at_key(best);
    for m in &members[1..] {
        let key = updated_at_key(m);
        let better = match policy {
            DuplicateKeepPolicy::Latest => key >= best_key,
            DuplicateKeepPolicy::Earliest => key < best_key,
        };
        if better {
            best = m;
            best_key = key;
        }
    }
    best
}

fn find_duplicates(results: &[StoredResult], policy: DuplicateKeepPolicy) -> Vec<DuplicateGroup> {
    let mut order: Vec<(&str, &str, &str)> = Vec::new();
    let mut groups: HashMap<(&str, &str, &str), Vec<&StoredResult>> = HashMap::new();
    for r in results {
        let (Some(student), Some(exam), Some(subject)) =
            (present(&r.student_id), present(&r.exam_id), present(&r.subject_id))
        else {
            continue;
        };
        let key = (student, exam, subject);
        let members = groups.entry(key).or_default();
        if members.is_empty() {
            order.push(key);
        }
        members.push(r);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let members = groups.get(&key)?;
            if members.len() < 2 {
                return None;
            }
            let keeper = pick_keeper(members, policy);
            Some(DuplicateGroup {
                student_id: key.0.to_string(),
                exam_id: key.1.to_string(),
                subject_id: key.2.to_string(),
                result_ids: members.iter().map(|m| m.id.clone()).collect(),
                keep_id: keeper.id.clone(),
            })
        })
        .collect()
}

fn grade_mismatch(r: &StoredResult) -> Option<GradeMismatch> {
    let marks = r.marks_obtained?;
    let expected = grade_and_points(marks);
    let grade_ok = r
        .grade
        .as_deref()
        .map(|g| g.trim() == expected.grade.as_str())
        .unwrap_or(false);
    let points_ok = r.points == Some(i64::from(expected.points));
    if grade_ok && points_ok {
        return None;
    }
    Some(GradeMismatch {
        result_id: r.id.clone(),
        marks_obtained: marks,
        stored_grade: r.grade.clone(),
        stored_points: r.points,
        expected_grade: expected.grade,
        expected_points: expected.points,
    })
}

fn orphan_refs(r: &StoredResult, known: &KnownEntities) -> Vec<OrphanRef> {
    let mut missing = Vec::new();
    if let Some(id) = present(&r.student_id) {
        if !known.students.contains(id) {
            missing.push(OrphanRef::Student);
        }
    }
    if let Some(id) = present(&r.exam_id) {
        if !known.exams.contains(id) {
            missing.push(OrphanRef::Exam);
        }
    }
    if let Some(id) = present(&r.subject_id) {
        if !known.subjects.contains(id) {
            missing.push(OrphanRef::Subject);
        }
    }
    missing
}

fn missing_fields(r: &StoredResult) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if present(&r.student_id).is_none() {
        fields.push("studentId");
    }
    if present(&r.exam_id).is_none() {
        fields.push("examId");
    }
    if present(&r.subject_id).is_none() {
        fields.push("subjectId");
    }
    if r.marks_obtained.is_none() {
        fields.push("marksObtained");
    }
    fields
}

/// Scans stored results for duplicates, stale grade/points, dangling
/// references and missing fields. Reports only; nothing is modified.
pub fn check(
    results: &[StoredResult],
    known: &KnownEntities,
    policy: DuplicateKeepPolicy,
) -> ConsistencyReport {
    let duplicates = find_duplicates(results, policy);
    let incorrect: Vec<GradeMismatch> = results.iter().filter_map(grade_mismatch).collect();

    let mut orphaned = Vec::new();
    let mut missing_required = Vec::new();
    for r in results {
        let refs = orphan_refs(r, known);
        if !refs.is_empty() {
            orphaned.push(OrphanedResult {
                result_id: r.id.clone(),
                missing: refs,
            });
        }
        let fields = missing_fields(r);
        if !fields.is_empty() {
            missing_required.push(MissingFields {
                result_id: r.id.clone(),
                fields,
            });
        }
    }

    let summary = ConsistencySummary {
        scanned: results.len(),
        duplicate_groups: duplicates.len(),
        redundant_records: duplicates.iter().map(|g| g.result_ids.len() - 1).sum(),
        incorrect_grades_or_points: incorrect.len(),
        orphaned: orphaned.len(),
        missing_required_fields: missing_required.len(),
    };

    ConsistencyReport {
        duplicates,
        incorrect_grades_or_points: incorrect,
        orphaned,
        missing_required_fields: missing_required,
        summary,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    pub duplicates: bool,
    pub grades: bool,
    pub remove_orphaned: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            duplicates: true,
            grades: true,
            remove_orphaned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeUpdate {
    pub result_id: String,
    pub grade: Grade,
    pub points: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixPlan {
    pub delete_ids: Vec<String>,
    pub grade_updates: Vec<GradeUpdate>,
}

impl FixPlan {
    pub fn is_empty(&self) -> bool {
        self.delete_ids.is_empty() && self.grade_updates.is_empty()
    }
}

/// Turns a report into the row deletions and rewrites that would repair it.
/// Rows scheduled for deletion never also receive a grade rewrite.
pub fn plan_fixes(report: &ConsistencyReport, options: FixOptions) -> FixPlan {
    let mut delete: BTreeSet<String> = BTreeSet::new();
    let mut delete_ids: Vec<String> = Vec::new();
    let mut schedule_delete = |id: &str, delete_ids: &mut Vec<String>| {
        if delete.insert(id.to_string()) {
            delete_ids.push(id.to_string());
        }
    };

    if options.duplicates {
        for g in &report.duplicates {
            for id in g.result_ids.iter().filter(|id| **id != g.keep_id) {
                schedule_delete(id, &mut delete_ids);
            }
        }
    }
    if options.remove_orphaned {
        for o in &report.orphaned {
            schedule_delete(&o.result_id, &mut delete_ids);
        }
    }

    let grade_updates = if options.grades {
        report
            .incorrect_grades_or_points
            .iter()
            .filter(|m| m.expected_grade.is_letter())
            .filter(|m| !delete.contains(&m.result_id))
            .map(|m| GradeUpdate {
                result_id: m.result_id.clone(),
                grade: m.expected_grade,
                points: m.expected_points,
            })
            .collect()
    } else {
        Vec::new()
    };

    FixPlan {
        delete_ids,
        grade_updates,
    }
}
