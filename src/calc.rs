use rusqlite::Connection;
use serde::Serialize;

/// 2-decimal rounding applied to every derived percentage before it is
/// stored or returned. Half-away-from-zero, matching the UI's display math.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Letter grade for a (rounded) percentage. Lower bounds are inclusive,
/// evaluated highest first.
pub fn letter_grade(percentage: f64) -> &'static str {
    if percentage >= 95.0 {
        "A+"
    } else if percentage >= 90.0 {
        "A"
    } else if percentage >= 85.0 {
        "B+"
    } else if percentage >= 80.0 {
        "B"
    } else if percentage >= 75.0 {
        "B-"
    } else if percentage >= 70.0 {
        "C+"
    } else if percentage >= 65.0 {
        "C"
    } else if percentage >= 60.0 {
        "C-"
    } else if percentage >= 55.0 {
        "D+"
    } else if percentage >= 50.0 {
        "D"
    } else {
        "F"
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
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEvaluation {
    pub percentage: f64,
    pub letter: &'static str,
}

/// Percentage and letter grade for one exam row. Runs on both the create
/// and the update path so stored `percentage`/`grade` always agree with
/// `marks_obtained`/`total_marks`.
///
/// `total_marks` must be a finite positive number; validation rejects
/// anything else before this is reached, so a violation here is a caller
/// bug, not bad user input.
pub fn evaluate_grade(marks_obtained: f64, total_marks: f64) -> Result<GradeEvaluation, CalcError> {
    if !total_marks.is_finite() || total_marks <= 0.0 {
        return Err(CalcError::new(
            "invalid_input",
            "total marks must be a positive number",
        ));
    }
    if !marks_obtained.is_finite() || marks_obtained < 0.0 {
        return Err(CalcError::new(
            "invalid_input",
            "marks obtained must be a non-negative number",
        ));
    }
    let percentage = round2(marks_obtained / total_marks * 100.0);
    Ok(GradeEvaluation {
        percentage,
        letter: letter_grade(percentage),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            "Late" => Some(Self::Late),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present_days: i64,
    pub absent_days: i64,
    pub late_days: i64,
    pub total_days: i64,
    pub attendance_percentage: f64,
}

/// Tally a student's attendance history by status. Only `Present` feeds
/// the numerator; `Late` still counts a day in the denominator. An empty
/// history yields an all-zero summary, never a division error.
pub fn summarize_attendance<I>(statuses: I) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut present_days: i64 = 0;
    let mut absent_days: i64 = 0;
    let mut late_days: i64 = 0;

    for status in statuses {
        match status {
            AttendanceStatus::Present => present_days += 1,
            AttendanceStatus::Absent => absent_days += 1,
            AttendanceStatus::Late => late_days += 1,
        }
    }

    let total_days = present_days + absent_days + late_days;
    let attendance_percentage = if total_days > 0 {
        round2(present_days as f64 / total_days as f64 * 100.0)
    } else {
        0.0
    };

    AttendanceSummary {
        present_days,
        absent_days,
        late_days,
        total_days,
        attendance_percentage,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub average_grade: f64,
    pub attendance_percentage: f64,
}

/// Dashboard rollup for one student: mean of the stored grade percentages
/// (0 when there are no grades) plus the attendance percentage passed
/// through from the aggregator (0 when absent).
pub fn compose_summary(
    grade_percentages: &[f64],
    attendance: Option<&AttendanceSummary>,
) -> StudentSummary {
    let average_grade = if grade_percentages.is_empty() {
        0.0
    } else {
        let sum: f64 = grade_percentages.iter().sum();
        round2(sum / grade_percentages.len() as f64)
    };
    StudentSummary {
        average_grade,
        attendance_percentage: attendance.map(|a| a.attendance_percentage).unwrap_or(0.0),
    }
}

pub fn attendance_summary_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<AttendanceSummary, CalcError> {
    let mut stmt = conn
        .prepare("SELECT status FROM attendance WHERE student_id = ?")
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let statuses: Vec<AttendanceStatus> = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?
        .iter()
        .filter_map(|s| AttendanceStatus::parse(s))
        .collect();
    Ok(summarize_attendance(statuses))
}

pub fn grade_percentages_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<f64>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT percentage FROM grades WHERE student_id = ?")
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([student_id], |r| r.get::<_, f64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// The one rollup every caller goes through: the student listing, the
/// detail view and the attendance summary endpoint must all agree on
/// these numbers for the same underlying rows.
pub fn student_summary(conn: &Connection, student_id: &str) -> Result<StudentSummary, CalcError> {
    let percentages = grade_percentages_for_student(conn, student_id)?;
    let attendance = attendance_summary_for_student(conn, student_id)?;
    Ok(compose_summary(&percentages, Some(&attendance)))
}
