use crate::model::{FluencyAssessment, GeneralAssessment, Goal, ItemScore, Student};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_ON_TRACK_PERCENT: f64 = 80.0;
pub const DEFAULT_SHORT_DESCRIPTION_CHARS: usize = 60;

/// Gradebook 1-decimal rounding: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GoalStatus {
    #[serde(rename = "On Track")]
    OnTrack,
    #[serde(rename = "Needs Support")]
    NeedsSupport,
    #[serde(rename = "No Recent Data")]
    NoRecentData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Flat,
    #[serde(rename = "No Data")]
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    pub on_track_percent: f64,
    pub short_description_chars: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            on_track_percent: DEFAULT_ON_TRACK_PERCENT,
            short_description_chars: DEFAULT_SHORT_DESCRIPTION_CHARS,
        }
    }
}

/// Percent correct for `goal_id` on the latest assessment date that scored it.
///
/// Dates are ISO strings, so the lexicographic maximum is also the
/// chronological one. Unrounded.
pub fn latest_percent_correct(goal_id: &str, assessments: &[GeneralAssessment]) -> Option<f64> {
    // date -> (correct, total)
    let mut by_date: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for a in assessments {
        for it in a.items.iter().filter(|it| it.goal_id == goal_id) {
            let e = by_date.entry(a.date.as_str()).or_insert((0, 0));
            if it.score == ItemScore::Correct {
                e.0 += 1;
            }
            e.1 += 1;
        }
    }
    let (_, &(correct, total)) = by_date.last_key_value()?;
    if total == 0 {
        return None;
    }
    Some(100.0 * correct as f64 / total as f64)
}

pub fn goal_status(percent: Option<f64>, on_track_percent: f64) -> GoalStatus {
    match percent {
        None => GoalStatus::NoRecentData,
        Some(p) if p >= on_track_percent => GoalStatus::OnTrack,
        Some(_) => GoalStatus::NeedsSupport,
    }
}

pub fn goal_trend(percent: Option<f64>) -> Trend {
    // No prior-vs-latest comparison yet; data present always reads as flat.
    if percent.is_some() {
        Trend::Flat
    } else {
        Trend::NoData
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalMastery {
    pub goal_id: String,
    pub area: String,
    pub description: String,
    pub latest_percent_correct: Option<f64>,
    pub trend: Trend,
    pub status: GoalStatus,
}

fn mastery_for_goal(
    goal: &Goal,
    assessments: &[GeneralAssessment],
    opts: &ReportOptions,
) -> GoalMastery {
    // Status compares the raw percent; only the reported figure is rounded.
    let raw = latest_percent_correct(&goal.id, assessments);
    GoalMastery {
        goal_id: goal.id.clone(),
        area: goal.area.clone(),
        description: goal.description.clone(),
        latest_percent_correct: raw.map(round_off_1_decimal),
        trend: goal_trend(raw),
        status: goal_status(raw, opts.on_track_percent),
    }
}

/// One mastery row per goal, in goal order. `assessments` must already be
/// restricted to the goals' student.
pub fn goal_mastery_summary(
    goals: &[Goal],
    assessments: &[GeneralAssessment],
    opts: &ReportOptions,
) -> Vec<GoalMastery> {
    goals
        .iter()
        .map(|g| mastery_for_goal(g, assessments, opts))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FluencyRow {
    pub date: String,
    pub wcpm: i64,
    pub accuracy_percent: f64,
    pub trend: Trend,
}

pub fn fluency_summary(records: &[FluencyAssessment]) -> Vec<FluencyRow> {
    records
        .iter()
        .map(|f| FluencyRow {
            date: f.date.clone(),
            wcpm: f.wcpm,
            accuracy_percent: round_off_1_decimal(f.accuracy_percent),
            trend: Trend::Flat,
        })
        .collect()
}

/// Latest record by calendar date; on a tie the earlier record wins.
pub fn latest_fluency(records: &[FluencyAssessment]) -> Option<&FluencyAssessment> {
    let mut best: Option<&FluencyAssessment> = None;
    for f in records {
        best = match best {
            Some(b) if parse_iso_date(&f.date) > parse_iso_date(&b.date) => Some(f),
            Some(b) => Some(b),
            None => Some(f),
        };
    }
    best
}

pub fn last_activity_date(
    general: &[GeneralAssessment],
    fluency: &[FluencyAssessment],
) -> Option<String> {
    let dates = general
        .iter()
        .map(|a| a.date.as_str())
        .chain(fluency.iter().map(|f| f.date.as_str()));
    let mut best: Option<&str> = None;
    for d in dates {
        best = match best {
            Some(b) if parse_iso_date(d) > parse_iso_date(b) => Some(d),
            Some(b) => Some(b),
            None => Some(d),
        };
    }
    best.map(|s| s.to_string())
}

/// Words correct per minute and accuracy for a fluency probe, or `None` when
/// the counts are out of range.
pub fn fluency_metrics(attempted: i64, errors: i64) -> Option<(i64, f64)> {
    if attempted <= 0 || errors < 0 || errors > attempted {
        return None;
    }
    let correct = attempted - errors;
    Some((correct, 100.0 * correct as f64 / attempted as f64))
}

pub fn short_description(description: &str, max_chars: usize) -> String {
    if description.chars().count() <= max_chars {
        return description.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = description.chars().take(keep).collect();
    out.push_str("...");
    out
}

pub struct StudentRecords<'a> {
    pub student: &'a Student,
    pub goals: &'a [Goal],
    pub general: &'a [GeneralAssessment],
    pub fluency: &'a [FluencyAssessment],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub student_id: String,
    pub student_name: String,
    pub grade_level: String,
    pub goal_id: String,
    pub goal_area: String,
    pub short_goal_description: String,
    pub latest_percent_correct: Option<f64>,
    pub latest_fluency_wcpm: Option<i64>,
    pub status: GoalStatus,
}

pub fn class_rows(records: &[StudentRecords<'_>], opts: &ReportOptions) -> Vec<ClassRow> {
    let mut rows = Vec::new();
    for r in records {
        let wcpm = latest_fluency(r.fluency).map(|f| f.wcpm);
        for g in r.goals {
            let m = mastery_for_goal(g, r.general, opts);
            rows.push(ClassRow {
                student_id: r.student.id.clone(),
                student_name: r.student.display_name(),
                grade_level: r.student.grade_level.clone(),
                goal_id: g.id.clone(),
                goal_area: g.area.clone(),
                short_goal_description: short_description(
                    &g.description,
                    opts.short_description_chars,
                ),
                latest_percent_correct: m.latest_percent_correct,
                latest_fluency_wcpm: wcpm,
                status: m.status,
            });
        }
    }
    rows
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassFilters {
    pub area: Option<String>,
    pub grade: Option<String>,
}

impl ClassFilters {
    /// Blank or "all" (any case) means no filter.
    pub fn new(area: Option<&str>, grade: Option<&str>) -> Self {
        fn narrow(v: Option<&str>) -> Option<String> {
            let v = v?.trim();
            if v.is_empty() || v.eq_ignore_ascii_case("all") {
                None
            } else {
                Some(v.to_string())
            }
        }
        Self {
            area: narrow(area),
            grade: narrow(grade),
        }
    }

    pub fn matches(&self, row: &ClassRow) -> bool {
        self.area.as_deref().map_or(true, |a| row.goal_area == a)
            && self.grade.as_deref().map_or(true, |g| row.grade_level == g)
    }
}

pub fn distinct_grades(students: &[Student]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in students {
        if !s.grade_level.is_empty() && !out.contains(&s.grade_level) {
            out.push(s.grade_level.clone());
        }
    }
    out
}
