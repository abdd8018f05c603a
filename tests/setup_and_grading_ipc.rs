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
    let exe = env!("CARGO_BIN_EXE_olevelsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn olevelsd");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn id_of(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

#[test]
fn setup_defaults_validation_and_persistence() {
    let workspace = temp_dir("olevels-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        defaults["reports"]["assumeAllSubjectsWhenUnselected"].as_bool(),
        Some(true)
    );
    assert_eq!(
        defaults["reports"]["includeSubjectPositions"].as_bool(),
        Some(true)
    );
    assert_eq!(
        defaults["consistency"]["duplicateKeepPolicy"].as_str(),
        Some("latest")
    );
    assert_eq!(
        defaults["consistency"]["removeOrphanedOnFix"].as_bool(),
        Some(false)
    );

    let rejects = [
        ("3", json!({ "section": "printer", "patch": {} })),
        ("4", json!({ "section": "reports", "patch": { "includeSubjectPositions": "yes" } })),
        ("5", json!({ "section": "reports", "patch": { "colour": true } })),
        ("6", json!({ "section": "consistency", "patch": { "duplicateKeepPolicy": "newest" } })),
        ("7", json!({ "section": "consistency", "patch": [] })),
    ];
    for (id, params) in rejects {
        let resp = request(&mut stdin, &mut reader, id, "setup.update", params);
        assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"), "{}", resp);
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "consistency", "patch": { "duplicateKeepPolicy": "EARLIEST" } }),
    );
    drop(stdin);
    let _ = child.wait();

    // Settings live in the workspace, so a fresh process sees them.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let saved = request_ok(&mut stdin, &mut reader, "10", "setup.get", json!({}));
    assert_eq!(
        saved["consistency"]["duplicateKeepPolicy"].as_str(),
        Some("earliest")
    );
    let check = request_ok(&mut stdin, &mut reader, "11", "consistency.check", json!({}));
    assert_eq!(check["keepPolicy"].as_str(), Some("earliest"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn report_settings_change_subject_fallback_and_positions() {
    let workspace = temp_dir("olevels-setup-reports");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = id_of(
        &request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "4C" })),
        "classId",
    );
    let exam_id = id_of(
        &request_ok(&mut stdin, &mut reader, "3", "exams.create", json!({ "name": "Terminal" })),
        "examId",
    );
    let core = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "subjects.create",
            json!({ "code": "KIS", "name": "Kiswahili", "isCore": true }),
        ),
        "subjectId",
    );
    let _optional = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "subjects.create",
            json!({ "code": "COM", "name": "Commerce", "isCore": false }),
        ),
        "subjectId",
    );
    let student_id = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "students.create",
            json!({ "classId": class_id, "name": "Imani" }),
        ),
        "studentId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "results.upsert",
        json!({ "studentId": student_id, "examId": exam_id, "subjectId": core, "marks": 68 }),
    );

    let assumed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.classReport",
        json!({ "classId": class_id, "examId": exam_id }),
    );
    let student = &assumed["students"][0];
    assert_eq!(student["subjectsAssumed"].as_bool(), Some(true));
    assert_eq!(student["subjectResults"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(student["subjectResults"][0]["position"].as_u64(), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({
            "section": "reports",
            "patch": { "assumeAllSubjectsWhenUnselected": false, "includeSubjectPositions": false }
        }),
    );
    let core_only = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "reports.classReport",
        json!({ "classId": class_id, "examId": exam_id }),
    );
    let student = &core_only["students"][0];
    assert_eq!(student["subjectsAssumed"].as_bool(), Some(false));
    assert_eq!(student["subjectResults"].as_array().map(|a| a.len()), Some(1));
    assert!(student["subjectResults"][0]["position"].is_null());
    assert_eq!(core_only["subjectPositions"], json!({}));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grading_endpoints_follow_the_grade_scale() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let cases = [
        (json!(75), "A", 1, "Excellent"),
        (json!(74.99), "B", 2, "Very Good"),
        (json!("65"), "B", 2, "Very Good"),
        (json!(45), "C", 3, "Good"),
        (json!(30), "D", 4, "Satisfactory"),
        (json!(29.99), "F", 5, "Fail"),
        (json!("abc"), "-", 0, "-"),
        (json!(null), "-", 0, "-"),
    ];
    for (i, (marks, grade, points, remarks)) in cases.into_iter().enumerate() {
        let id = format!("e{}", i);
        let r = request_ok(
            &mut stdin,
            &mut reader,
            &id,
            "grading.evaluate",
            json!({ "marks": marks }),
        );
        assert_eq!(r["grade"].as_str(), Some(grade), "marks {}", marks);
        assert_eq!(r["points"].as_u64(), Some(points), "marks {}", marks);
        assert_eq!(r["remarks"].as_str(), Some(remarks), "marks {}", marks);
    }

    for (id, points, division) in [
        ("d1", json!(7), "I"),
        ("d2", json!(17), "I"),
        ("d3", json!(18), "II"),
        ("d4", json!(25), "III"),
        ("d5", json!(33), "IV"),
        ("d6", json!(34), "0"),
        ("d7", json!(null), "0"),
    ] {
        let r = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "grading.division",
            json!({ "points": points }),
        );
        assert_eq!(r["division"].as_str(), Some(division), "points {}", points);
    }

    let results: Vec<serde_json::Value> = [80, 70, 60, 50, 40, 35, 90, 20]
        .iter()
        .enumerate()
        .map(|(i, m)| json!({ "subjectId": format!("s{}", i), "marksObtained": m }))
        .collect();
    let best = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "grading.bestSeven",
        json!({ "results": results }),
    );
    // 1 + 2 + 3 + 3 + 4 + 4 + 1; the F is dropped.
    assert_eq!(best["bestSevenPoints"].as_u64(), Some(18));
    assert_eq!(best["division"].as_str(), Some("II"));
    assert_eq!(best["bestSevenResults"].as_array().map(|a| a.len()), Some(7));

    let bad = request(
        &mut stdin,
        &mut reader,
        "b2",
        "grading.bestSeven",
        json!({ "results": "nope" }),
    );
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_params"));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "grading.statistics",
        json!({ "marks": [50, 60, 60, 70, "x"] }),
    );
    assert_eq!(stats["count"].as_u64(), Some(4));
    assert_eq!(stats["statistics"]["mean"].as_f64(), Some(60.0));
    assert_eq!(stats["statistics"]["median"].as_f64(), Some(60.0));
    assert_eq!(stats["statistics"]["mode"].as_f64(), Some(60.0));
    assert_eq!(stats["statistics"]["standardDeviation"].as_f64(), Some(7.07));

    let ranked = request_ok(
        &mut stdin,
        &mut reader,
        "rk",
        "grading.rank",
        json!({
            "entries": [
                { "id": "a", "metric": 90 },
                { "id": "b", "metric": 80 },
                { "id": "c", "metric": 90 }
            ]
        }),
    );
    let ranks: Vec<(&str, u64)> = ranked["ranked"]
        .as_array()
        .expect("ranked")
        .iter()
        .map(|r| {
            (
                r["id"].as_str().unwrap_or_default(),
                r["rank"].as_u64().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(ranks, vec![("a", 1), ("c", 1), ("b", 3)]);

    let asc = request_ok(
        &mut stdin,
        &mut reader,
        "rk2",
        "grading.rank",
        json!({
            "direction": "asc",
            "entries": [{ "id": "x", "metric": 20 }, { "id": "y", "metric": 9 }]
        }),
    );
    assert_eq!(asc["ranked"][0]["id"].as_str(), Some("y"));

    let bad_direction = request(
        &mut stdin,
        &mut reader,
        "rk3",
        "grading.rank",
        json!({ "direction": "sideways", "entries": [] }),
    );
    assert_eq!(bad_direction["error"]["code"].as_str(), Some("bad_params"));

    let positions = request_ok(
        &mut stdin,
        &mut reader,
        "sp",
        "grading.subjectPositions",
        json!({
            "students": [
                { "studentId": "a", "marksBySubject": { "MAT": 70, "ENG": 40 } },
                { "studentId": "b", "marksBySubject": { "MAT": 85 } }
            ]
        }),
    );
    assert_eq!(positions["positions"]["MAT"][0]["studentId"].as_str(), Some("b"));
    assert_eq!(positions["positions"]["MAT"][1]["position"].as_u64(), Some(2));
    assert_eq!(positions["positions"]["ENG"][0]["position"].as_u64(), Some(1));

    drop(stdin);
    let _ = child.wait();
}
