use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Number of subjects that count towards the division total.
pub const BEST_SUBJECT_COUNT: usize = 7;

/// Half-up rounding to 2 decimals: `floor(100 * x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
    /// Marks could not be read as a number.
    #[serde(rename = "-")]
    Invalid,
    /// No result entered for a subject the student takes.
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
            Grade::Invalid => "-",
            Grade::NotAvailable => "N/A",
        }
    }

    /// Parses stored grade text. Only the five letters are recognised.
    pub fn parse(raw: &str) -> Option<Grade> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }

    pub fn is_letter(self) -> bool {
        !matches!(self, Grade::Invalid | Grade::NotAvailable)
    }

    pub fn points(self) -> u8 {
        match self {
            Grade::A => 1,
            Grade::B => 2,
            Grade::C => 3,
            Grade::D => 4,
            Grade::F => 5,
            Grade::Invalid | Grade::NotAvailable => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GradePoints {
    pub grade: Grade,
    pub points: u8,
}

impl GradePoints {
    pub const INVALID: GradePoints = GradePoints {
        grade: Grade::Invalid,
        points: 0,
    };
}

/// Maps a 0-100 mark onto the O-Level letter scale.
///
/// | Marks   | Grade | Points |
/// |---------|-------|--------|
/// | >= 75   | A     | 1      |
/// | >= 65   | B     | 2      |
/// | >= 45   | C     | 3      |
/// | >= 30   | D     | 4      |
/// | < 30    | F     | 5      |
///
/// Non-finite input yields the `-`/0 sentinel instead of failing.
pub fn grade_and_points(marks: f64) -> GradePoints {
    if !marks.is_finite() {
        return GradePoints::INVALID;
    }
    let grade = match marks {
        m if m >= 75.0 => Grade::A,
        m if m >= 65.0 => Grade::B,
        m if m >= 45.0 => Grade::C,
        m if m >= 30.0 => Grade::D,
        _ => Grade::F,
    };
    GradePoints {
        grade,
        points: grade.points(),
    }
}

pub fn remarks(grade: Grade) -> &'static str {
    match grade {
        Grade::A => "Excellent",
        Grade::B => "Very Good",
        Grade::C => "Good",
        Grade::D => "Satisfactory",
        Grade::F => "Fail",
        Grade::Invalid | Grade::NotAvailable => "-",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Division {
    #[serde(rename = "I")]
    One,
    #[serde(rename = "II")]
    Two,
    #[serde(rename = "III")]
    Three,
    #[serde(rename = "IV")]
    Four,
    #[serde(rename = "0")]
    Zero,
}

impl Division {
    pub fn as_str(self) -> &'static str {
        match self {
            Division::One => "I",
            Division::Two => "II",
            Division::Three => "III",
            Division::Four => "IV",
            Division::Zero => "0",
        }
    }
}

/// Classifies an aggregate point total. Missing totals fall in division 0.
pub fn division(points: Option<u32>) -> Division {
    match points {
        Some(7..=17) => Division::One,
        Some(18..=21) => Division::Two,
        Some(22..=25) => Division::Three,
        Some(26..=33) => Division::Four,
        _ => Division::Zero,
    }
}

/// One student's outcome in one subject for one exam, in the single
/// normalized shape the calculations work on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    #[serde(default)]
    pub id: String,
    pub student_id: String,
    pub exam_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub class_id: String,
    #[serde(default)]
    pub academic_year_id: String,
    pub marks_obtained: Option<f64>,
    pub grade: Option<Grade>,
    pub points: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SubjectResult {
    /// Whether the record holds an actual score. A zero with no grade is an
    /// unscored row; a zero that was graded F is a real mark.
    pub fn is_scored(&self) -> bool {
        let graded = self.grade.map(Grade::is_letter).unwrap_or(false);
        match self.marks_obtained {
            Some(m) if m.is_finite() => graded || m != 0.0,
            _ => graded,
        }
    }

    /// Stored points when plausible, otherwise derived from marks or grade.
    pub fn resolved_points(&self) -> u8 {
        if let Some(p) = self.points {
            if (1..=5).contains(&p) {
                return p;
            }
        }
        if let Some(m) = self.marks_obtained {
            let gp = grade_and_points(m);
            if gp.points > 0 {
                return gp.points;
            }
        }
        self.grade.map(Grade::points).unwrap_or(0)
    }

    pub fn resolved_grade(&self) -> Grade {
        match (self.grade, self.marks_obtained) {
            (Some(g), _) if g.is_letter() => g,
            (_, Some(m)) => grade_and_points(m).grade,
            (Some(g), None) => g,
            (None, None) => Grade::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestSeven {
    #[serde(rename = "bestSevenResults")]
    pub results: Vec<SubjectResult>,
    #[serde(rename = "bestSevenPoints")]
    pub points: u32,
    pub division: Division,
}

/// Picks the (up to) seven scored subjects with the lowest points.
pub fn best_seven(results: &[SubjectResult]) -> BestSeven {
    let mut scored: Vec<SubjectResult> = results
        .iter()
        .filter(|r| r.is_scored())
        .map(|r| {
            let mut r = r.clone();
            r.points = Some(r.resolved_points());
            if r.grade.map(|g| !g.is_letter()).unwrap_or(true) {
                r.grade = Some(r.resolved_grade());
            }
            r
        })
        .collect();

    // Stable: ties keep input order.
    scored.sort_by_key(|r| r.points.unwrap_or(0));
    scored.truncate(BEST_SUBJECT_COUNT);

    let points: u32 = scored.iter().map(|r| u32::from(r.points.unwrap_or(0))).sum();
    BestSeven {
        results: scored,
        points,
        division: division(Some(points)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankDirection {
    /// Higher is better (marks).
    #[serde(alias = "descending")]
    Desc,
    /// Lower is better (points).
    #[serde(alias = "ascending")]
    Asc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub id: String,
    pub metric: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranked {
    pub id: String,
    pub metric: f64,
    pub rank: usize,
}

/// Standard competition ranking ("1224"): tied metrics share a rank and the
/// next distinct metric takes its 1-based sorted position.
pub fn rank(entries: &[RankEntry], direction: RankDirection) -> Vec<Ranked> {
    let mut sorted: Vec<&RankEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| match direction {
        RankDirection::Desc => b.metric.total_cmp(&a.metric),
        RankDirection::Asc => a.metric.total_cmp(&b.metric),
    });

    let mut out: Vec<Ranked> = Vec::with_capacity(sorted.len());
    let mut current = 0_usize;
    let mut prev: Option<f64> = None;
    for (i, e) in sorted.into_iter().enumerate() {
        let tied = prev
            .map(|p| p.total_cmp(&e.metric) == Ordering::Equal)
            .unwrap_or(false);
        if !tied {
            current = i + 1;
        }
        prev = Some(e.metric);
        out.push(Ranked {
            id: e.id.clone(),
            metric: e.metric,
            rank: current,
        });
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSubjectMarks {
    pub student_id: String,
    pub marks_by_subject: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPosition {
    pub student_id: String,
    pub marks: f64,
    pub position: usize,
}

/// Ranks every subject independently, highest marks first. Students without
/// marks in a subject do not appear in that subject's list.
pub fn subject_positions(
    students: &[StudentSubjectMarks],
) -> BTreeMap<String, Vec<SubjectPosition>> {
    let mut by_subject: BTreeMap<String, Vec<RankEntry>> = BTreeMap::new();
    for s in students {
        for (subject_id, marks) in &s.marks_by_subject {
            if !marks.is_finite() {
                continue;
            }
            by_subject
                .entry(subject_id.clone())
                .or_default()
                .push(RankEntry {
                    id: s.student_id.clone(),
                    metric: *marks,
                });
        }
    }

    by_subject
        .into_iter()
        .map(|(subject_id, entries)| {
            let ranked = rank(&entries, RankDirection::Desc)
                .into_iter()
                .map(|r| SubjectPosition {
                    student_id: r.id,
                    marks: r.metric,
                    position: r.rank,
                })
                .collect();
            (subject_id, ranked)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub mean: f64,
    pub median: f64,
    pub mode: f64,
    pub standard_deviation: f64,
}

pub fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

/// Most frequent value; among equally frequent values the smallest wins.
pub fn compute_mode(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let v = sorted[i];
        let mut j = i + 1;
        while j < sorted.len() && sorted[j].total_cmp(&v) == Ordering::Equal {
            j += 1;
        }
        let count = j - i;
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((v, count));
        }
        i = j;
    }
    best.map(|(v, _)| v).unwrap_or(0.0)
}

/// Mean, median, mode and population standard deviation, each rounded to
/// 2 decimals. Non-finite values are ignored; no values gives all zeros.
pub fn statistics(marks: &[f64]) -> ClassStatistics {
    let values: Vec<f64> = marks.iter().copied().filter(|m| m.is_finite()).collect();
    if values.is_empty() {
        return ClassStatistics::default();
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;

    ClassStatistics {
        mean: round_off_2_decimals(mean),
        median: round_off_2_decimals(compute_median(&values)),
        mode: round_off_2_decimals(compute_mode(&values)),
        standard_deviation: round_off_2_decimals(variance.sqrt()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn db(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}
