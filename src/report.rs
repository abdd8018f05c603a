use crate::calc::{
    best_seven, rank, remarks, round_off_2_decimals, statistics, subject_positions, ClassStatistics,
    Division, Grade, RankDirection, RankEntry, StudentSubjectMarks, SubjectPosition, SubjectResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const WARNING_NO_STUDENTS: &str = "No students found for this class";
pub const WARNING_NO_RESULTS: &str = "No results have been entered for this exam";
pub const WARNING_STUDENT_NO_RESULTS: &str = "No results have been entered for this student";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_core: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `None` when no selection has been recorded for the student.
    #[serde(default)]
    pub selected_subject_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    /// Without recorded selections, score the student on every subject
    /// (true) or on core subjects only (false).
    pub assume_all_subjects_when_unselected: bool,
    pub include_subject_positions: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            assume_all_subjects_when_unselected: true,
            include_subject_positions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub is_core: bool,
    pub marks_obtained: f64,
    pub grade: Grade,
    pub points: u8,
    pub remarks: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub placeholder: bool,
    pub in_best_seven: bool,
    pub position: Option<usize>,
    /// False for rows that carry a grade but no mark.
    #[serde(skip)]
    pub marks_entered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub student_name: String,
    pub subjects_assumed: bool,
    pub subject_results: Vec<SubjectLine>,
    pub results_entered: usize,
    pub total_marks: f64,
    pub average_marks: f64,
    pub best_seven_points: u32,
    pub best_seven_results: Vec<SubjectResult>,
    pub division: Division,
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
    #[serde(rename = "C")]
    pub c: usize,
    #[serde(rename = "D")]
    pub d: usize,
    #[serde(rename = "F")]
    pub f: usize,
}

impl GradeDistribution {
    fn add(&mut self, grade: Grade) {
        match grade {
            Grade::A => self.a += 1,
            Grade::B => self.b += 1,
            Grade::C => self.c += 1,
            Grade::D => self.d += 1,
            Grade::F => self.f += 1,
            Grade::Invalid | Grade::NotAvailable => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAnalysis {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub student_count: usize,
    pub average_marks: f64,
    pub highest_marks: f64,
    pub lowest_marks: f64,
    pub grade_distribution: GradeDistribution,
    /// Mean points per entered result: 1 is best, 5 is worst.
    pub gpa: f64,
    pub statistics: ClassStatistics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DivisionSummary {
    #[serde(rename = "I")]
    pub one: usize,
    #[serde(rename = "II")]
    pub two: usize,
    #[serde(rename = "III")]
    pub three: usize,
    #[serde(rename = "IV")]
    pub four: usize,
    #[serde(rename = "0")]
    pub zero: usize,
}

impl DivisionSummary {
    fn add(&mut self, d: Division) {
        match d {
            Division::One => self.one += 1,
            Division::Two => self.two += 1,
            Division::Three => self.three += 1,
            Division::Four => self.four += 1,
            Division::Zero => self.zero += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.one + self.two + self.three + self.four + self.zero
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub class_id: String,
    pub exam_id: String,
    pub students: Vec<StudentAggregate>,
    pub subject_analysis: Vec<SubjectAnalysis>,
    pub subject_positions: BTreeMap<String, Vec<SubjectPosition>>,
    pub division_summary: DivisionSummary,
    pub class_average: String,
    pub student_count: usize,
    pub students_with_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub exam_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    pub student: StudentAggregate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl StudentReport {
    /// Lifts one student out of a class report, keeping rank and positions.
    pub fn from_class_report(report: &ClassReport, student_id: &str) -> Option<StudentReport> {
        let student = report
            .students
            .iter()
            .find(|s| s.student_id == student_id)?
            .clone();
        let warning = if student.results_entered == 0 {
            Some(WARNING_STUDENT_NO_RESULTS.to_string())
        } else {
            None
        };
        Some(StudentReport {
            exam_id: report.exam_id.clone(),
            class_id: Some(report.class_id.clone()),
            student,
            class_size: Some(report.students_with_results),
            warning,
        })
    }
}

fn format_average(v: f64) -> String {
    format!("{:.2}", round_off_2_decimals(v))
}

/// Subjects a student is scored on, in catalog order.
fn applicable_subjects<'a>(
    student: &RosterStudent,
    catalog: &'a [Subject],
    options: &ReportOptions,
) -> (Vec<&'a Subject>, bool) {
    match &student.selected_subject_ids {
        Some(selected) => {
            let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();
            let subjects = catalog
                .iter()
                .filter(|s| s.is_core || selected.contains(s.id.as_str()))
                .collect();
            (subjects, false)
        }
        None if options.assume_all_subjects_when_unselected => (catalog.iter().collect(), true),
        None => (catalog.iter().filter(|s| s.is_core).collect(), false),
    }
}

/// Results for one exam keyed by (student, subject). Later records replace
/// earlier ones, so callers pass them oldest first.
fn index_results<'a>(
    exam_id: &str,
    results: &'a [SubjectResult],
) -> HashMap<(&'a str, &'a str), &'a SubjectResult> {
    let mut by_pair = HashMap::new();
    for r in results.iter().filter(|r| r.exam_id == exam_id) {
        by_pair.insert((r.student_id.as_str(), r.subject_id.as_str()), r);
    }
    by_pair
}

fn placeholder_line(subject: &Subject) -> SubjectLine {
    SubjectLine {
        subject_id: subject.id.clone(),
        subject_code: subject.code.clone(),
        subject_name: subject.name.clone(),
        is_core: subject.is_core,
        marks_obtained: 0.0,
        grade: Grade::NotAvailable,
        points: 0,
        remarks: remarks(Grade::NotAvailable),
        comment: None,
        placeholder: true,
        in_best_seven: false,
        position: None,
        marks_entered: false,
    }
}

fn aggregate_student(
    student: &RosterStudent,
    catalog: &[Subject],
    by_pair: &HashMap<(&str, &str), &SubjectResult>,
    options: &ReportOptions,
) -> StudentAggregate {
    let (subjects, subjects_assumed) = applicable_subjects(student, catalog, options);

    let mut lines: Vec<SubjectLine> = Vec::with_capacity(subjects.len());
    let mut scored: Vec<SubjectResult> = Vec::new();
    for subject in subjects {
        let found = by_pair
            .get(&(student.id.as_str(), subject.id.as_str()))
            .filter(|r| r.is_scored());
        let Some(r) = found else {
            lines.push(placeholder_line(subject));
            continue;
        };
        let grade = r.resolved_grade();
        let marks = r.marks_obtained.filter(|m| m.is_finite());
        lines.push(SubjectLine {
            subject_id: subject.id.clone(),
            subject_code: subject.code.clone(),
            subject_name: subject.name.clone(),
            is_core: subject.is_core,
            marks_obtained: marks.unwrap_or(0.0),
            grade,
            points: r.resolved_points(),
            remarks: remarks(grade),
            comment: r.comment.clone(),
            placeholder: false,
            in_best_seven: false,
            position: None,
            marks_entered: marks.is_some(),
        });
        scored.push((*r).clone());
    }

    let best = best_seven(&scored);
    let best_subjects: HashSet<&str> = best.results.iter().map(|r| r.subject_id.as_str()).collect();
    for line in lines.iter_mut() {
        line.in_best_seven = best_subjects.contains(line.subject_id.as_str());
    }

    let results_entered = lines.iter().filter(|l| !l.placeholder).count();
    // Grade-only rows count toward best seven but not toward mark figures.
    let marked: Vec<f64> = lines
        .iter()
        .filter(|l| !l.placeholder && l.marks_entered)
        .map(|l| l.marks_obtained)
        .collect();
    let total_marks: f64 = marked.iter().sum();
    let average_marks = if marked.is_empty() {
        0.0
    } else {
        round_off_2_decimals(total_marks / marked.len() as f64)
    };

    StudentAggregate {
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        subjects_assumed,
        subject_results: lines,
        results_entered,
        total_marks: round_off_2_decimals(total_marks),
        average_marks,
        best_seven_points: best.points,
        best_seven_results: best.results,
        division: best.division,
        rank: None,
    }
}

fn analyse_subject(subject: &Subject, aggregates: &[StudentAggregate]) -> SubjectAnalysis {
    let mut marks: Vec<f64> = Vec::new();
    let mut graded = 0_usize;
    let mut points_sum = 0_u32;
    let mut distribution = GradeDistribution::default();
    for line in aggregates
        .iter()
        .flat_map(|a| a.subject_results.iter())
        .filter(|l| l.subject_id == subject.id && !l.placeholder)
    {
        if line.marks_entered {
            marks.push(line.marks_obtained);
        }
        graded += 1;
        points_sum += u32::from(line.points);
        distribution.add(line.grade);
    }

    let stats = statistics(&marks);
    let (highest, lowest) = if marks.is_empty() {
        (0.0, 0.0)
    } else {
        (
            marks.iter().copied().fold(f64::MIN, f64::max),
            marks.iter().copied().fold(f64::MAX, f64::min),
        )
    };
    let gpa = if graded == 0 {
        0.0
    } else {
        round_off_2_decimals(f64::from(points_sum) / graded as f64)
    };

    SubjectAnalysis {
        subject_id: subject.id.clone(),
        subject_code: subject.code.clone(),
        subject_name: subject.name.clone(),
        student_count: graded,
        average_marks: stats.mean,
        highest_marks: highest,
        lowest_marks: lowest,
        grade_distribution: distribution,
        gpa,
        statistics: stats,
    }
}

fn empty_class_report(class_id: &str, exam_id: &str, warning: &str) -> ClassReport {
    ClassReport {
        class_id: class_id.to_string(),
        exam_id: exam_id.to_string(),
        students: Vec::new(),
        subject_analysis: Vec::new(),
        subject_positions: BTreeMap::new(),
        division_summary: DivisionSummary::default(),
        class_average: format_average(0.0),
        student_count: 0,
        students_with_results: 0,
        warning: Some(warning.to_string()),
    }
}

/// Builds the ranked report for one class sitting one exam.
///
/// Results for other exams are ignored. Students without any entered
/// result stay in the report with placeholder lines but are left out of
/// ranking, the class average and the division summary.
pub fn build_class_report(
    class_id: &str,
    exam_id: &str,
    students: &[RosterStudent],
    results: &[SubjectResult],
    catalog: &[Subject],
    options: &ReportOptions,
) -> ClassReport {
    if students.is_empty() {
        return empty_class_report(class_id, exam_id, WARNING_NO_STUDENTS);
    }

    let by_pair = index_results(exam_id, results);
    let mut aggregates: Vec<StudentAggregate> = students
        .iter()
        .map(|s| aggregate_student(s, catalog, &by_pair, options))
        .collect();

    let with_results: Vec<&StudentAggregate> =
        aggregates.iter().filter(|a| a.results_entered > 0).collect();
    if with_results.is_empty() {
        let mut report = empty_class_report(class_id, exam_id, WARNING_NO_RESULTS);
        report.student_count = aggregates.len();
        report.students = aggregates;
        return report;
    }

    let entries: Vec<RankEntry> = with_results
        .iter()
        .map(|a| RankEntry {
            id: a.student_id.clone(),
            metric: a.average_marks,
        })
        .collect();
    let mut division_summary = DivisionSummary::default();
    for a in &with_results {
        division_summary.add(a.division);
    }
    let class_average = with_results.iter().map(|a| a.average_marks).sum::<f64>()
        / with_results.len() as f64;
    let students_with_results = with_results.len();

    let rank_by_student: HashMap<String, usize> = rank(&entries, RankDirection::Desc)
        .into_iter()
        .map(|r| (r.id, r.rank))
        .collect();

    let marks: Vec<StudentSubjectMarks> = aggregates
        .iter()
        .map(|a| StudentSubjectMarks {
            student_id: a.student_id.clone(),
            marks_by_subject: a
                .subject_results
                .iter()
                .filter(|l| !l.placeholder && l.marks_entered)
                .map(|l| (l.subject_id.clone(), l.marks_obtained))
                .collect(),
        })
        .collect();
    let positions = subject_positions(&marks);

    for a in aggregates.iter_mut() {
        a.rank = rank_by_student.get(&a.student_id).copied();
        if !options.include_subject_positions {
            continue;
        }
        for line in a.subject_results.iter_mut().filter(|l| !l.placeholder) {
            line.position = positions.get(&line.subject_id).and_then(|list| {
                list.iter()
                    .find(|p| p.student_id == a.student_id)
                    .map(|p| p.position)
            });
        }
    }
    // Ranked students first, unranked keep roster order at the end.
    aggregates.sort_by_key(|a| a.rank.unwrap_or(usize::MAX));

    let offered: HashSet<&str> = aggregates
        .iter()
        .flat_map(|a| a.subject_results.iter().map(|l| l.subject_id.as_str()))
        .collect();
    let subject_analysis: Vec<SubjectAnalysis> = catalog
        .iter()
        .filter(|s| offered.contains(s.id.as_str()))
        .map(|s| analyse_subject(s, &aggregates))
        .collect();

    ClassReport {
        class_id: class_id.to_string(),
        exam_id: exam_id.to_string(),
        student_count: aggregates.len(),
        students: aggregates,
        subject_analysis,
        subject_positions: if options.include_subject_positions {
            positions
        } else {
            BTreeMap::new()
        },
        division_summary,
        class_average: format_average(class_average),
        students_with_results,
        warning: None,
    }
}

/// Builds a single student's report without class context (no rank).
pub fn build_student_report(
    student: &RosterStudent,
    exam_id: &str,
    results: &[SubjectResult],
    catalog: &[Subject],
    options: &ReportOptions,
) -> StudentReport {
    let by_pair = index_results(exam_id, results);
    let aggregate = aggregate_student(student, catalog, &by_pair, options);
    let warning = if aggregate.results_entered == 0 {
        Some(WARNING_STUDENT_NO_RESULTS.to_string())
    } else {
        None
    };
    StudentReport {
        exam_id: exam_id.to_string(),
        class_id: None,
        student: aggregate,
        class_size: None,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::grade_and_points;

    fn subject(id: &str, is_core: bool) -> Subject {
        Subject {
            id: id.into(),
            code: id.to_ascii_uppercase(),
            name: id.into(),
            is_core,
        }
    }

    fn catalog() -> Vec<Subject> {
        vec![
            subject("math", true),
            subject("eng", true),
            subject("kis", true),
            subject("bio", true),
            subject("chem", true),
            subject("phy", true),
            subject("geo", true),
            subject("comp", false),
        ]
    }

    fn student(id: &str, selected: Option<Vec<&str>>) -> RosterStudent {
        RosterStudent {
            id: id.into(),
            name: format!("Student {}", id),
            selected_subject_ids: selected.map(|s| s.iter().map(|v| v.to_string()).collect()),
        }
    }

    fn result(student: &str, subject: &str, marks: f64) -> SubjectResult {
        let gp = grade_and_points(marks);
        SubjectResult {
            id: format!("{}-{}", student, subject),
            student_id: student.into(),
            exam_id: "e1".into(),
            subject_id: subject.into(),
            class_id: "c1".into(),
            marks_obtained: Some(marks),
            grade: Some(gp.grade),
            points: Some(gp.points),
            ..Default::default()
        }
    }

    fn seven(student: &str, marks: [f64; 7]) -> Vec<SubjectResult> {
        ["math", "eng", "kis", "bio", "chem", "phy", "geo"]
            .iter()
            .zip(marks)
            .map(|(s, m)| result(student, s, m))
            .collect()
    }

    #[test]
    fn empty_roster_gives_warning_not_error() {
        let report = build_class_report("c1", "e1", &[], &[], &catalog(), &ReportOptions::default());
        assert!(report.students.is_empty());
        assert_eq!(report.class_average, "0.00");
        assert_eq!(report.division_summary, DivisionSummary::default());
        assert_eq!(report.warning.as_deref(), Some(WARNING_NO_STUDENTS));
    }

    #[test]
    fn roster_without_results_is_empty_but_valid() {
        let students = vec![student("s1", Some(vec![]))];
        let report =
            build_class_report("c1", "e1", &students, &[], &catalog(), &ReportOptions::default());
        assert_eq!(report.warning.as_deref(), Some(WARNING_NO_RESULTS));
        assert_eq!(report.class_average, "0.00");
        assert_eq!(report.students.len(), 1);
        assert!(report.students[0].subject_results.iter().all(|l| l.placeholder));
        assert_eq!(report.division_summary.total(), 0);
    }

    #[test]
    fn class_report_ranks_and_summarises() {
        let students = vec![
            student("s1", Some(vec![])),
            student("s2", Some(vec![])),
            student("s3", Some(vec![])),
        ];
        let mut results = seven("s1", [90.0, 85.0, 80.0, 70.0, 65.0, 50.0, 40.0]);
        results.extend(seven("s2", [40.0, 35.0, 30.0, 50.0, 20.0, 45.0, 33.0]));
        results.extend(seven("s3", [90.0, 85.0, 80.0, 70.0, 65.0, 50.0, 40.0]));

        let report =
            build_class_report("c1", "e1", &students, &results, &catalog(), &ReportOptions::default());
        assert!(report.warning.is_none());

        let ranks: Vec<(&str, Option<usize>)> = report
            .students
            .iter()
            .map(|s| (s.student_id.as_str(), s.rank))
            .collect();
        assert_eq!(ranks, vec![("s1", Some(1)), ("s3", Some(1)), ("s2", Some(3))]);

        let s1 = &report.students[0];
        assert_eq!(s1.best_seven_points, 14);
        assert_eq!(s1.division, Division::One);
        assert_eq!(s1.average_marks, 68.57);

        // s2: 4 + 4 + 4 + 3 + 5 + 3 + 4 = 27
        let s2 = &report.students[2];
        assert_eq!(s2.best_seven_points, 27);
        assert_eq!(s2.division, Division::Four);

        assert_eq!(report.division_summary.one, 2);
        assert_eq!(report.division_summary.four, 1);
        assert_eq!(report.division_summary.total(), 3);
        assert_eq!(report.class_average, "57.76");

        let math = &report.subject_analysis[0];
        assert_eq!(math.subject_id, "math");
        assert_eq!(math.student_count, 3);
        assert_eq!(math.highest_marks, 90.0);
        assert_eq!(math.lowest_marks, 40.0);
        assert_eq!(math.grade_distribution.a, 2);
        assert_eq!(math.grade_distribution.d, 1);
        assert_eq!(math.gpa, 2.0);
        assert_eq!(math.average_marks, 73.33);

        let math_line = s1.subject_results.iter().find(|l| l.subject_id == "math").unwrap();
        assert_eq!(math_line.position, Some(1));
        assert_eq!(math_line.remarks, "Excellent");
        let s2_math = s2.subject_results.iter().find(|l| l.subject_id == "math").unwrap();
        assert_eq!(s2_math.position, Some(3));
    }

    #[test]
    fn optional_subjects_need_selection() {
        let students = vec![student("s1", Some(vec!["comp"])), student("s2", Some(vec![]))];
        let mut results = vec![result("s1", "comp", 88.0), result("s2", "comp", 91.0)];
        results.push(result("s1", "math", 50.0));
        results.push(result("s2", "math", 52.0));

        let report =
            build_class_report("c1", "e1", &students, &results, &catalog(), &ReportOptions::default());
        let s1 = report.students.iter().find(|s| s.student_id == "s1").unwrap();
        let s2 = report.students.iter().find(|s| s.student_id == "s2").unwrap();
        assert_eq!(s1.subject_results.len(), 8);
        assert_eq!(s2.subject_results.len(), 7);
        assert!(s2.subject_results.iter().all(|l| l.subject_id != "comp"));
        assert_eq!(s2.results_entered, 1);
        assert_eq!(report.subject_positions["comp"].len(), 1);
    }

    #[test]
    fn missing_selection_follows_fallback_setting() {
        let students = vec![student("s1", None)];
        let results = vec![result("s1", "comp", 70.0)];

        let report =
            build_class_report("c1", "e1", &students, &results, &catalog(), &ReportOptions::default());
        assert!(report.students[0].subjects_assumed);
        assert_eq!(report.students[0].subject_results.len(), 8);
        assert_eq!(report.students[0].results_entered, 1);

        let core_only = ReportOptions {
            assume_all_subjects_when_unselected: false,
            ..ReportOptions::default()
        };
        let report = build_class_report("c1", "e1", &students, &results, &catalog(), &core_only);
        assert!(!report.students[0].subjects_assumed);
        assert_eq!(report.students[0].subject_results.len(), 7);
        assert_eq!(report.warning.as_deref(), Some(WARNING_NO_RESULTS));
    }

    #[test]
    fn placeholders_are_reported_but_not_counted() {
        let students = vec![student("s1", Some(vec![]))];
        let results = vec![result("s1", "math", 80.0), result("s1", "eng", 60.0)];
        let report =
            build_class_report("c1", "e1", &students, &results, &catalog(), &ReportOptions::default());
        let s1 = &report.students[0];
        assert_eq!(s1.results_entered, 2);
        assert_eq!(s1.best_seven_points, 4);
        assert_eq!(s1.best_seven_results.len(), 2);
        assert_eq!(s1.average_marks, 70.0);
        let kis = s1.subject_results.iter().find(|l| l.subject_id == "kis").unwrap();
        assert!(kis.placeholder);
        assert_eq!(kis.grade, Grade::NotAvailable);
        assert_eq!(kis.points, 0);
        assert!(!kis.in_best_seven);
        assert_eq!(kis.position, None);
    }

    #[test]
    fn grade_without_marks_counts_for_best_seven_only() {
        let students = vec![student("s1", Some(vec![])), student("s2", Some(vec![]))];
        let mut results = vec![result("s1", "math", 80.0), result("s1", "eng", 60.0)];
        results.push(SubjectResult {
            id: "s2-math".into(),
            student_id: "s2".into(),
            exam_id: "e1".into(),
            subject_id: "math".into(),
            marks_obtained: None,
            grade: Some(Grade::A),
            points: Some(1),
            ..Default::default()
        });
        results.push(result("s2", "eng", 50.0));
        let report =
            build_class_report("c1", "e1", &students, &results, &catalog(), &ReportOptions::default());

        let s2 = report.students.iter().find(|s| s.student_id == "s2").unwrap();
        assert_eq!(s2.results_entered, 2);
        assert_eq!(s2.best_seven_points, 4);
        assert_eq!(s2.total_marks, 50.0);
        assert_eq!(s2.average_marks, 50.0);
        let math_line = s2.subject_results.iter().find(|l| l.subject_id == "math").unwrap();
        assert!(!math_line.placeholder);
        assert_eq!(math_line.grade, Grade::A);
        assert_eq!(math_line.position, None);

        let math = report
            .subject_analysis
            .iter()
            .find(|a| a.subject_id == "math")
            .unwrap();
        assert_eq!(math.student_count, 2);
        assert_eq!(math.average_marks, 80.0);
        assert_eq!(math.lowest_marks, 80.0);
        assert_eq!(math.grade_distribution.a, 2);
        assert_eq!(math.gpa, 1.0);
        assert_eq!(report.subject_positions["math"].len(), 1);
    }

    #[test]
    fn other_exams_and_later_duplicates() {
        let students = vec![student("s1", Some(vec![]))];
        let mut other_exam = result("s1", "math", 20.0);
        other_exam.exam_id = "e2".into();
        let results = vec![result("s1", "math", 40.0), result("s1", "math", 76.0), other_exam];
        let report =
            build_class_report("c1", "e1", &students, &results, &catalog(), &ReportOptions::default());
        let math = report.students[0]
            .subject_results
            .iter()
            .find(|l| l.subject_id == "math")
            .unwrap();
        assert_eq!(math.marks_obtained, 76.0);
        assert_eq!(math.grade, Grade::A);
    }

    #[test]
    fn student_report_standalone_and_from_class() {
        let s = student("s1", Some(vec![]));
        let results = seven("s1", [90.0, 85.0, 80.0, 70.0, 65.0, 50.0, 40.0]);
        let report = build_student_report(&s, "e1", &results, &catalog(), &ReportOptions::default());
        assert_eq!(report.student.best_seven_points, 14);
        assert_eq!(report.student.rank, None);
        assert!(report.warning.is_none());

        let class = build_class_report(
            "c1",
            "e1",
            &[s.clone(), student("s2", Some(vec![]))],
            &results,
            &catalog(),
            &ReportOptions::default(),
        );
        let lifted = StudentReport::from_class_report(&class, "s1").unwrap();
        assert_eq!(lifted.student.rank, Some(1));
        assert_eq!(lifted.class_size, Some(1));
        let other = StudentReport::from_class_report(&class, "s2").unwrap();
        assert_eq!(other.warning.as_deref(), Some(WARNING_STUDENT_NO_RESULTS));
        assert!(StudentReport::from_class_report(&class, "nobody").is_none());
    }
}
