use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_progmond");
    let mut child = Command::new(exe)
        .env_remove("PROGMOND_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn progmond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn with_token(token: &str, mut params: serde_json::Value) -> serde_json::Value {
    params["sessionToken"] = json!(token);
    params
}

struct Fixture {
    token: String,
    student_id: String,
    reading_goal: String,
    math_goal: String,
}

fn register_with_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    email: &str,
    grade: &str,
) -> Fixture {
    let reg = request_ok(
        stdin,
        reader,
        &format!("{email}-reg"),
        "auth.register",
        json!({ "email": email, "password": "pw", "confirmPassword": "pw" }),
    );
    let token = reg["sessionToken"].as_str().expect("token").to_string();
    let s = request_ok(
        stdin,
        reader,
        &format!("{email}-student"),
        "students.add",
        with_token(&token, json!({ "firstName": "Dee", "lastName": "Park", "gradeLevel": grade })),
    );
    let student_id = s["studentId"].as_str().expect("studentId").to_string();

    let mut goal = |area: &str, description: &str| {
        let g = request_ok(
            stdin,
            reader,
            &format!("{email}-goal-{area}"),
            "goals.add",
            with_token(
                &token,
                json!({
                    "studentId": student_id,
                    "area": area,
                    "description": description,
                    "goalGradeLevel": grade,
                    "masteryCriteria": "80% on 3 consecutive probes"
                }),
            ),
        );
        g["goalId"].as_str().expect("goalId").to_string()
    };
    let reading_goal = goal(
        "Reading",
        "Given a grade-level passage the student will answer literal comprehension questions",
    );
    let math_goal = goal("Math", "Add within 20");

    Fixture {
        token,
        student_id,
        reading_goal,
        math_goal,
    }
}

#[test]
fn student_and_class_reports_use_latest_date() {
    let workspace = temp_dir("progmond-reports");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = register_with_student(&mut stdin, &mut reader, "r@x.org", "3");
    let t = fx.token.as_str();

    let general = |date: &str, scores: &[&str]| {
        json!({
            "studentId": fx.student_id,
            "date": date,
            "items": scores
                .iter()
                .map(|s| json!({ "goalId": fx.reading_goal, "prompt": "q", "correctAnswer": "a", "score": s }))
                .collect::<Vec<_>>()
        })
    };
    let saves = [
        general("2024-01-15", &["correct", "correct", "correct", "correct", "correct"]),
        general("2024-02-20", &["correct", "correct", "correct", "correct", "incorrect"]),
        general("2024-02-01", &["incorrect"]),
    ];
    for (i, params) in saves.into_iter().enumerate() {
        let r = request_ok(
            &mut stdin,
            &mut reader,
            &format!("save{i}"),
            "assessments.general.save",
            with_token(t, params),
        );
        assert_eq!(r["saved"], true);
    }
    for (i, (date, attempted, errors)) in [("2024-02-10", 80, 8), ("2024-03-01", 100, 10), ("2024-03-01", 120, 0)]
        .into_iter()
        .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("flu{i}"),
            "assessments.fluency.save",
            with_token(
                t,
                json!({
                    "studentId": fx.student_id,
                    "date": date,
                    "totalWordsAttempted": attempted,
                    "errors": errors
                }),
            ),
        );
    }

    let open = request_ok(&mut stdin, &mut reader, "2", "reports.open", with_token(t, json!({ "tab": "class" })));
    assert_eq!(open["redirect"], "/reports/class");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.student",
        with_token(t, json!({ "studentId": fx.student_id })),
    );
    let goals = student["goalsSummary"].as_array().expect("goalsSummary");
    assert_eq!(goals.len(), 2);
    assert_eq!(goals[0]["goalId"], fx.reading_goal);
    assert_eq!(goals[0]["latestPercentCorrect"], 80.0);
    assert_eq!(goals[0]["status"], "On Track");
    assert_eq!(goals[0]["trend"], "Flat");
    assert!(goals[1]["latestPercentCorrect"].is_null());
    assert_eq!(goals[1]["status"], "No Recent Data");
    assert_eq!(goals[1]["trend"], "No Data");

    let fluency = student["fluencySummary"].as_array().expect("fluencySummary");
    assert_eq!(fluency.len(), 3);
    assert_eq!(fluency[0]["date"], "2024-02-10");
    assert_eq!(fluency[1]["wcpm"], 90);
    assert_eq!(fluency[1]["accuracyPercent"], 90.0);

    let class = request_ok(&mut stdin, &mut reader, "4", "reports.class", with_token(t, json!({})));
    let rows = class["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["studentName"], "Dee Park");
    // Tie on the latest date keeps the first record saved.
    assert_eq!(rows[0]["latestFluencyWcpm"], 90);
    let short = rows[0]["shortGoalDescription"].as_str().expect("short");
    assert_eq!(short.chars().count(), 60);
    assert!(short.ends_with("..."));
    assert_eq!(rows[1]["shortGoalDescription"], "Add within 20");
    assert_eq!(class["grades"], json!(["3"]));
    assert_eq!(class["selectedArea"], "all");

    let math_only = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.class",
        with_token(t, json!({ "area": "Math", "grade": "all" })),
    );
    let rows = math_only["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["goalId"], fx.math_goal);
    assert_eq!(rows[0]["status"], "No Recent Data");

    let other_grade = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.class",
        with_token(t, json!({ "grade": "5" })),
    );
    assert_eq!(other_grade["rows"].as_array().map(|r| r.len()), Some(0));
}

#[test]
fn on_track_threshold_follows_setup() {
    let workspace = temp_dir("progmond-reports-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = register_with_student(&mut stdin, &mut reader, "s@x.org", "4");
    let t = fx.token.as_str();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.general.save",
        with_token(
            t,
            json!({
                "studentId": fx.student_id,
                "date": "2024-04-01",
                "items": [
                    { "goalId": fx.math_goal, "score": "correct" },
                    { "goalId": fx.math_goal, "score": "correct" },
                    { "goalId": fx.math_goal, "score": "correct" },
                    { "goalId": fx.math_goal }
                ]
            }),
        ),
    );

    let before = request_ok(&mut stdin, &mut reader, "3", "reports.class", with_token(t, json!({ "area": "Math" })));
    assert_eq!(before["rows"][0]["latestPercentCorrect"], 75.0);
    assert_eq!(before["rows"][0]["status"], "Needs Support");

    let bad = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        with_token(t, json!({ "section": "reports", "patch": { "onTrackPercent": 0 } })),
    );
    assert_eq!(bad["error"]["code"], "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        with_token(t, json!({ "section": "reports", "patch": { "onTrackPercent": 75 } })),
    );
    let setup = request_ok(&mut stdin, &mut reader, "6", "setup.get", with_token(t, json!({})));
    assert_eq!(setup["reports"]["onTrackPercent"], 75);
    assert_eq!(setup["reports"]["shortDescriptionChars"], 60);
    assert_eq!(setup["sessions"]["ttlMinutes"], 720);

    let after = request_ok(&mut stdin, &mut reader, "7", "reports.class", with_token(t, json!({ "area": "Math" })));
    assert_eq!(after["rows"][0]["status"], "On Track");
}

#[test]
fn teachers_cannot_reach_each_others_records() {
    let workspace = temp_dir("progmond-isolation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let a = register_with_student(&mut stdin, &mut reader, "a@x.org", "3");
    let b = register_with_student(&mut stdin, &mut reader, "b@x.org", "5");
    let tb = b.token.as_str();

    let list = request_ok(&mut stdin, &mut reader, "2", "students.list", with_token(tb, json!({})));
    let ids: Vec<&str> = list["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(ids, vec![b.student_id.as_str()]);

    let get = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        with_token(tb, json!({ "studentId": a.student_id })),
    );
    assert_eq!(get["error"]["code"], "not_found");
    assert_eq!(get["error"]["details"]["redirect"], "/students");

    let goals = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "goals.list",
        with_token(tb, json!({ "studentId": a.student_id })),
    );
    assert_eq!(goals["goals"].as_array().map(|g| g.len()), Some(0));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.student",
        with_token(tb, json!({ "studentId": a.student_id })),
    );
    assert!(report["selectedStudent"].is_null());
    assert_eq!(report["goalsSummary"].as_array().map(|g| g.len()), Some(0));

    let class = request_ok(&mut stdin, &mut reader, "6", "reports.class", with_token(tb, json!({})));
    assert!(class["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .all(|r| r["studentId"] == b.student_id.as_str()));

    let add_goal = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "goals.add",
        with_token(
            tb,
            json!({
                "studentId": a.student_id,
                "area": "Math",
                "description": "sneaky",
                "goalGradeLevel": "3",
                "masteryCriteria": "n/a"
            }),
        ),
    );
    assert_eq!(add_goal["saved"], false);

    let save = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assessments.general.save",
        with_token(
            tb,
            json!({
                "studentId": b.student_id,
                "items": [{ "goalId": a.reading_goal, "score": "correct" }]
            }),
        ),
    );
    assert_eq!(save["saved"], false);

    let del_goal = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "goals.delete",
        with_token(tb, json!({ "goalId": a.math_goal })),
    );
    assert_eq!(del_goal["deleted"], false);
    let del_student = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.delete",
        with_token(tb, json!({ "studentId": a.student_id })),
    );
    assert_eq!(del_student["deleted"], false);

    // Teacher A still sees everything intact.
    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.get",
        with_token(&a.token, json!({ "studentId": a.student_id })),
    );
    assert_eq!(mine["goals"].as_array().map(|g| g.len()), Some(2));
}

#[test]
fn setup_changes_stay_with_their_teacher() {
    let workspace = temp_dir("progmond-setup-isolation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let a = register_with_student(&mut stdin, &mut reader, "a@x.org", "3");
    let b = register_with_student(&mut stdin, &mut reader, "b@x.org", "3");
    let ta = a.token.as_str();
    let tb = b.token.as_str();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.general.save",
        with_token(
            ta,
            json!({
                "studentId": a.student_id,
                "date": "2024-04-01",
                "items": [
                    { "goalId": a.math_goal, "score": "correct" },
                    { "goalId": a.math_goal, "score": "correct" },
                    { "goalId": a.math_goal, "score": "correct" },
                    { "goalId": a.math_goal, "score": "correct" },
                    { "goalId": a.math_goal, "score": "incorrect" }
                ]
            }),
        ),
    );
    let before = request_ok(&mut stdin, &mut reader, "3", "reports.class", with_token(ta, json!({ "area": "Math" })));
    assert_eq!(before["rows"][0]["status"], "On Track");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        with_token(tb, json!({ "section": "reports", "patch": { "onTrackPercent": 100 } })),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        with_token(tb, json!({ "section": "fluency", "patch": { "passageText": "B's own passage." } })),
    );

    let after = request_ok(&mut stdin, &mut reader, "6", "reports.class", with_token(ta, json!({ "area": "Math" })));
    assert_eq!(after["rows"][0]["latestPercentCorrect"], 80.0);
    assert_eq!(after["rows"][0]["status"], "On Track");

    let setup_a = request_ok(&mut stdin, &mut reader, "7", "setup.get", with_token(ta, json!({})));
    assert_eq!(setup_a["reports"]["onTrackPercent"], 80);
    let setup_b = request_ok(&mut stdin, &mut reader, "8", "setup.get", with_token(tb, json!({})));
    assert_eq!(setup_b["reports"]["onTrackPercent"], 100);

    let passage_a = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assessments.fluency.generate",
        with_token(ta, json!({ "studentId": a.student_id })),
    );
    assert_ne!(passage_a["fluencyData"]["passageText"], "B's own passage.");
    let passage_b = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "assessments.fluency.generate",
        with_token(tb, json!({ "studentId": b.student_id })),
    );
    assert_eq!(passage_b["fluencyData"]["passageText"], "B's own passage.");
}

#[test]
fn unpadded_dates_are_stored_zero_padded() {
    let workspace = temp_dir("progmond-date-padding");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = register_with_student(&mut stdin, &mut reader, "d@x.org", "2");
    let t = fx.token.as_str();

    // January is all correct; May is half. Unpadded "2024-1-5" would sort
    // after "2024-05-01" as raw text.
    let saves = [
        ("2024-05-01", vec!["correct", "incorrect"]),
        ("2024-1-5", vec!["correct", "correct"]),
    ];
    for (i, (date, scores)) in saves.into_iter().enumerate() {
        let items: Vec<serde_json::Value> = scores
            .iter()
            .map(|s| json!({ "goalId": fx.math_goal, "score": s }))
            .collect();
        let r = request_ok(
            &mut stdin,
            &mut reader,
            &format!("save{i}"),
            "assessments.general.save",
            with_token(t, json!({ "studentId": fx.student_id, "date": date, "items": items })),
        );
        assert_eq!(r["saved"], true);
    }

    let conn = rusqlite::Connection::open(workspace.join("progmon.sqlite3")).expect("open db");
    let mut stmt = conn
        .prepare("SELECT date FROM general_assessments ORDER BY rowid")
        .expect("prepare");
    let dates: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(dates, vec!["2024-05-01", "2024-01-05"]);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.student",
        with_token(t, json!({ "studentId": fx.student_id })),
    );
    let math = report["goalsSummary"]
        .as_array()
        .expect("goalsSummary")
        .iter()
        .find(|g| g["goalId"] == fx.math_goal.as_str())
        .cloned()
        .expect("math row");
    assert_eq!(math["latestPercentCorrect"], 50.0);
    assert_eq!(math["status"], "Needs Support");
}
