use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{db_conn, discarded, param_str, require_teacher, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{NewGoal, StoreError, TeacherScope};
use serde_json::json;
use std::collections::HashMap;

fn handle_goals_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);

    let student_filter = param_str(req, "studentId");
    let area_filter = param_str(req, "area").filter(|a| !a.eq_ignore_ascii_case("all"));

    let students = match scope.students() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let goals = match scope.goals() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };

    let names: HashMap<&str, String> = students
        .iter()
        .map(|s| (s.id.as_str(), s.display_name()))
        .collect();
    let rows: Vec<serde_json::Value> = goals
        .iter()
        .filter(|g| student_filter.as_deref().map_or(true, |sid| g.student_id == sid))
        .filter(|g| area_filter.as_deref().map_or(true, |a| g.area == a))
        .map(|g| {
            let mut v = json!(g);
            v["studentName"] = json!(names
                .get(g.student_id.as_str())
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()));
            v
        })
        .collect();

    ok(
        &req.id,
        json!({
            "students": students,
            "goals": rows,
            "selectedStudentId": student_filter.unwrap_or_default(),
            "selectedArea": area_filter.unwrap_or_else(|| "all".to_string()),
        }),
    )
}

fn handle_goals_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let Some(student_id) = param_str(req, "studentId") else {
        return discarded(req, "/goals".into(), "missing studentId");
    };

    let new = NewGoal {
        student_id: student_id.clone(),
        area: param_str(req, "area").unwrap_or_default(),
        description: param_str(req, "description").unwrap_or_default(),
        goal_grade_level: param_str(req, "goalGradeLevel").unwrap_or_default(),
        mastery_criteria: param_str(req, "masteryCriteria").unwrap_or_default(),
    };
    match TeacherScope::new(conn, &teacher.id).add_goal(new) {
        Ok(g) => {
            tracing::info!(student_id = %student_id, goal_id = %g.id, "goal added");
            ok(
                &req.id,
                json!({
                    "saved": true,
                    "goalId": g.id,
                    "redirect": format!("/goals?studentId={}", student_id),
                }),
            )
        }
        Err(StoreError::Validation(msg)) => discarded(req, "/goals".into(), &msg),
        Err(StoreError::NotFound(what)) => discarded(req, "/goals".into(), what),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_goals_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let goal_id = match required_str(req, "goalId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match TeacherScope::new(conn, &teacher.id).delete_goal(&goal_id) {
        Ok(deleted) => {
            if deleted {
                tracing::info!(goal_id = %goal_id, "goal deleted");
            }
            ok(&req.id, json!({ "deleted": deleted, "redirect": "/goals" }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_goals_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let goal_id = match required_str(req, "goalId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "active must be boolean", None);
    };

    match TeacherScope::new(conn, &teacher.id).set_goal_active(&goal_id, active) {
        Ok(true) => {
            tracing::info!(goal_id = %goal_id, active, "goal active flag changed");
            ok(&req.id, json!({ "goalId": goal_id, "active": active }))
        }
        Ok(false) => err(&req.id, "not_found", "goal not found", None),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "goals.list" => Some(handle_goals_list(state, req)),
        "goals.add" => Some(handle_goals_add(state, req)),
        "goals.delete" => Some(handle_goals_delete(state, req)),
        "goals.setActive" => Some(handle_goals_set_active(state, req)),
        _ => None,
    }
}
