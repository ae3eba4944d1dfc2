use crate::calc::{self, ClassFilters, StudentRecords};
use crate::ipc::error::{ok, store_err};
use crate::ipc::helpers::{db_conn, param_str, require_teacher};
use crate::ipc::types::{AppState, Request};
use crate::model::{FluencyAssessment, GeneralAssessment, Goal, Student};
use crate::store::{StoreResult, TeacherScope};
use serde_json::json;

use super::setup;

fn handle_reports_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_teacher(conn, req) {
        return e;
    }
    let redirect = match param_str(req, "tab").as_deref() {
        Some("class") => "/reports/class",
        _ => "/reports/student",
    };
    ok(&req.id, json!({ "redirect": redirect }))
}

fn handle_reports_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);
    let opts = setup::report_options(conn, &teacher.id);

    let students = match scope.students() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let selected = param_str(req, "studentId")
        .and_then(|sid| students.iter().find(|s| s.id == sid).cloned());

    let (goals_summary, fluency_summary) = match &selected {
        Some(s) => {
            let loaded = scope.student_goals(&s.id).and_then(|goals| {
                Ok((
                    goals,
                    scope.general_assessments(&s.id)?,
                    scope.fluency_assessments(&s.id)?,
                ))
            });
            match loaded {
                Ok((goals, general, fluency)) => (
                    calc::goal_mastery_summary(&goals, &general, &opts),
                    calc::fluency_summary(&fluency),
                ),
                Err(e) => return store_err(&req.id, &e),
            }
        }
        None => (Vec::new(), Vec::new()),
    };

    ok(
        &req.id,
        json!({
            "students": students,
            "selectedStudent": selected,
            "goalsSummary": goals_summary,
            "fluencySummary": fluency_summary,
        }),
    )
}

struct LoadedStudent {
    student: Student,
    goals: Vec<Goal>,
    general: Vec<GeneralAssessment>,
    fluency: Vec<FluencyAssessment>,
}

fn load_roster(scope: &TeacherScope<'_>, students: &[Student]) -> StoreResult<Vec<LoadedStudent>> {
    students
        .iter()
        .map(|s| {
            Ok(LoadedStudent {
                student: s.clone(),
                goals: scope.student_goals(&s.id)?,
                general: scope.general_assessments(&s.id)?,
                fluency: scope.fluency_assessments(&s.id)?,
            })
        })
        .collect()
}

fn handle_reports_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);
    let opts = setup::report_options(conn, &teacher.id);
    let filters = ClassFilters::new(
        param_str(req, "area").as_deref(),
        param_str(req, "grade").as_deref(),
    );

    let students = match scope.students() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let loaded = match load_roster(&scope, &students) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let records: Vec<StudentRecords<'_>> = loaded
        .iter()
        .map(|l| StudentRecords {
            student: &l.student,
            goals: &l.goals,
            general: &l.general,
            fluency: &l.fluency,
        })
        .collect();

    let rows: Vec<calc::ClassRow> = calc::class_rows(&records, &opts)
        .into_iter()
        .filter(|r| filters.matches(r))
        .collect();

    ok(
        &req.id,
        json!({
            "rows": rows,
            "selectedArea": filters.area.as_deref().unwrap_or("all"),
            "selectedGrade": filters.grade.as_deref().unwrap_or("all"),
            "grades": calc::distinct_grades(&students),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.open" => Some(handle_reports_open(state, req)),
        "reports.student" => Some(handle_reports_student(state, req)),
        "reports.class" => Some(handle_reports_class(state, req)),
        _ => None,
    }
}
