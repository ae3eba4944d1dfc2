use crate::calc;
use crate::ipc::error::{ok, store_err};
use crate::ipc::helpers::{
    db_conn, discarded, param_i64, param_str, require_teacher, resolve_date,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Goal, ItemScore};
use crate::store::{NewItem, StoreError, TeacherScope};
use serde_json::json;

use super::setup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    General,
    Fluency,
}

impl Tab {
    fn parse(s: Option<&str>) -> Self {
        match s {
            Some("fluency") => Tab::Fluency,
            _ => Tab::General,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Tab::General => "general",
            Tab::Fluency => "fluency",
        }
    }
}

fn tab_redirect(tab: Tab, student_id: Option<&str>) -> String {
    match student_id {
        Some(sid) => format!("/assessments?tab={}&studentId={}", tab.as_str(), sid),
        None => format!("/assessments?tab={}", tab.as_str()),
    }
}

/// Active goals of an owned student; empty for unknown or foreign ids.
fn active_goals(scope: &TeacherScope<'_>, student_id: Option<&str>) -> Result<Vec<Goal>, StoreError> {
    let Some(sid) = student_id else {
        return Ok(Vec::new());
    };
    Ok(scope
        .student_goals(sid)?
        .into_iter()
        .filter(|g| g.active)
        .collect())
}

/// `goalIds` may arrive as a list or, from a single checkbox, as one value.
fn requested_goal_ids(req: &Request) -> Vec<String> {
    let one = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    match req.params.get("goalIds") {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(one).collect(),
        Some(v) => one(v).into_iter().collect(),
        None => Vec::new(),
    }
}

fn handle_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);
    let tab = Tab::parse(param_str(req, "tab").as_deref());
    let student_id = param_str(req, "studentId");

    let students = match scope.students() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let goals = match active_goals(&scope, student_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };

    ok(
        &req.id,
        json!({
            "tab": tab.as_str(),
            "students": students,
            "selectedStudentId": student_id,
            "studentGoals": goals,
        }),
    )
}

fn handle_general_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);
    let student_id = param_str(req, "studentId");

    let goals = match active_goals(&scope, student_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let items: Vec<serde_json::Value> = requested_goal_ids(req)
        .iter()
        .filter_map(|gid| goals.iter().find(|g| &g.id == gid))
        .map(|g| {
            json!({
                "goalId": g.id,
                "goalArea": g.area,
                "goalDescription": g.description,
                "prompt": format!("Sample item for goal \"{}\"", g.description),
                "correctAnswer": "Teacher-defined correct answer",
                "score": ItemScore::Incorrect,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "tab": Tab::General.as_str(),
            "selectedStudentId": student_id,
            "studentGoals": goals,
            "generatedItems": items,
        }),
    )
}

fn parse_items(req: &Request) -> Result<Vec<NewItem>, String> {
    let Some(raw) = req.params.get("items") else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err("items must be an array".into());
    };

    let text = |v: &serde_json::Value, key: &str| {
        v.get(key)
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let goal_id = match v.get("goalId") {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if goal_id.is_empty() {
            continue;
        }
        let score = match v.get("score").and_then(|s| s.as_str()).map(str::trim) {
            None | Some("") => ItemScore::Incorrect,
            Some(s) => ItemScore::parse(s).ok_or_else(|| format!("unknown score: {}", s))?,
        };
        out.push(NewItem {
            goal_id,
            prompt: text(v, "prompt"),
            correct_answer: text(v, "correctAnswer"),
            score,
        });
    }
    Ok(out)
}

fn handle_general_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let Some(student_id) = param_str(req, "studentId") else {
        return discarded(req, tab_redirect(Tab::General, None), "missing studentId");
    };
    let redirect = tab_redirect(Tab::General, Some(&student_id));
    let Some(date) = resolve_date(req) else {
        return discarded(req, redirect, "malformed date");
    };
    let items = match parse_items(req) {
        Ok(v) => v,
        Err(msg) => return discarded(req, redirect, &msg),
    };

    match TeacherScope::new(conn, &teacher.id).save_general_assessment(&student_id, &date, &items) {
        Ok(a) => {
            tracing::info!(
                student_id = %student_id,
                assessment_id = %a.id,
                items = a.items.len(),
                "general assessment saved"
            );
            ok(
                &req.id,
                json!({ "saved": true, "assessmentId": a.id, "redirect": redirect }),
            )
        }
        Err(StoreError::Validation(msg)) => discarded(req, redirect, &msg),
        Err(StoreError::NotFound(what)) => discarded(req, redirect, what),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_fluency_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);
    let student_id = param_str(req, "studentId");

    let goals = match active_goals(&scope, student_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };

    ok(
        &req.id,
        json!({
            "tab": Tab::Fluency.as_str(),
            "selectedStudentId": student_id,
            "studentGoals": goals,
            "fluencyData": {
                "studentId": student_id,
                "topic": param_str(req, "topic").unwrap_or_default(),
                "passageText": setup::passage_text(conn, &teacher.id),
            },
        }),
    )
}

fn handle_fluency_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let Some(student_id) = param_str(req, "studentId") else {
        return discarded(req, tab_redirect(Tab::Fluency, None), "missing studentId");
    };
    let redirect = tab_redirect(Tab::Fluency, Some(&student_id));
    let Some(date) = resolve_date(req) else {
        return discarded(req, redirect, "malformed date");
    };
    // A blank error count means none were marked.
    let errors = match req.params.get("errors") {
        None | Some(serde_json::Value::Null) => Some(0),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Some(0),
        Some(_) => param_i64(req, "errors"),
    };
    let (Some(attempted), Some(errors)) = (param_i64(req, "totalWordsAttempted"), errors) else {
        return discarded(req, redirect, "word counts must be integers");
    };

    match TeacherScope::new(conn, &teacher.id)
        .save_fluency_assessment(&student_id, &date, attempted, errors)
    {
        Ok(f) => {
            tracing::info!(
                student_id = %student_id,
                fluency_id = %f.id,
                wcpm = f.wcpm,
                "fluency assessment saved"
            );
            ok(
                &req.id,
                json!({
                    "saved": true,
                    "fluencyAssessmentId": f.id,
                    "wcpm": f.wcpm,
                    "accuracyPercent": calc::round_off_1_decimal(f.accuracy_percent),
                    "redirect": redirect,
                }),
            )
        }
        Err(StoreError::Validation(msg)) => discarded(req, redirect, &msg),
        Err(StoreError::NotFound(what)) => discarded(req, redirect, what),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.view" => Some(handle_view(state, req)),
        "assessments.general.generate" => Some(handle_general_generate(state, req)),
        "assessments.general.save" => Some(handle_general_save(state, req)),
        "assessments.fluency.generate" => Some(handle_fluency_generate(state, req)),
        "assessments.fluency.save" => Some(handle_fluency_save(state, req)),
        _ => None,
    }
}
