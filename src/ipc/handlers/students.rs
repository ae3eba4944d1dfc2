use crate::calc;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{db_conn, discarded, param_str, require_teacher, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{NewStudent, StoreError, TeacherScope};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);

    let students = match scope.students() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let goals = match scope.goals() {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };

    let mut rows = Vec::with_capacity(students.len());
    for s in &students {
        let general = match scope.general_assessments(&s.id) {
            Ok(v) => v,
            Err(e) => return store_err(&req.id, &e),
        };
        let fluency = match scope.fluency_assessments(&s.id) {
            Ok(v) => v,
            Err(e) => return store_err(&req.id, &e),
        };
        let goal_count = goals.iter().filter(|g| g.student_id == s.id).count();
        rows.push(json!({
            "id": s.id,
            "firstName": s.first_name,
            "lastName": s.last_name,
            "gradeLevel": s.grade_level,
            "goalCount": goal_count,
            "lastAssessmentDate": calc::last_activity_date(&general, &fluency),
        }));
    }

    ok(&req.id, json!({ "students": rows }))
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);

    let new = NewStudent {
        first_name: param_str(req, "firstName").unwrap_or_default(),
        last_name: param_str(req, "lastName").unwrap_or_default(),
        grade_level: param_str(req, "gradeLevel").unwrap_or_default(),
    };
    match scope.add_student(new) {
        Ok(s) => {
            tracing::info!(teacher_id = %teacher.id, student_id = %s.id, "student added");
            ok(
                &req.id,
                json!({ "saved": true, "studentId": s.id, "redirect": "/students" }),
            )
        }
        Err(StoreError::Validation(msg)) => discarded(req, "/students".into(), &msg),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match TeacherScope::new(conn, &teacher.id).delete_student(&student_id) {
        Ok(deleted) => {
            if deleted {
                tracing::info!(teacher_id = %teacher.id, student_id = %student_id, "student deleted");
            }
            ok(&req.id, json!({ "deleted": deleted, "redirect": "/students" }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = TeacherScope::new(conn, &teacher.id);

    let student = match scope.student(&student_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "student not found",
                Some(json!({ "redirect": "/students" })),
            )
        }
        Err(e) => return store_err(&req.id, &e),
    };
    let goals = match scope.student_goals(&student.id) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };

    ok(&req.id, json!({ "student": student, "goals": goals }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.add" => Some(handle_students_add(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        _ => None,
    }
}
