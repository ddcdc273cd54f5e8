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
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
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

fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "c1",
        "classes.create",
        json!({ "name": "ថ្នាក់ទី៧A" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let s1 = request_ok(
        stdin,
        reader,
        "s1",
        "students.create",
        json!({
            "classId": class_id,
            "khmerName": "សុខ សុភា",
            "lastName": "Sok",
            "firstName": "Sophea",
            "gender": "F"
        }),
    );
    let s2 = request_ok(
        stdin,
        reader,
        "s2",
        "students.create",
        json!({
            "classId": class_id,
            "lastName": "Chan",
            "firstName": "Dara",
            "gender": "M"
        }),
    );
    (
        class_id,
        s1["studentId"].as_str().expect("studentId").to_string(),
        s2["studentId"].as_str().expect("studentId").to_string(),
    )
}

#[test]
fn bulk_save_create_resubmit_clear_april_2025() {
    let workspace = temp_dir("attendanced-bulk-scenario");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s1, s2) = seed_class(&mut stdin, &mut reader, &workspace);

    // First submission marks two fresh cells.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "save-1",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": [
                { "studentId": s1, "day": 1, "session": "M", "value": "A" },
                { "studentId": s2, "day": 1, "session": "M", "value": "P" }
            ]
        }),
    );
    assert_eq!(saved["created"].as_u64(), Some(2));
    assert_eq!(saved["updated"].as_u64(), Some(0));
    assert_eq!(saved["deleted"].as_u64(), Some(0));
    assert_eq!(saved["savedCount"].as_u64(), Some(2));
    assert_eq!(saved["errorCount"].as_u64(), Some(0));
    assert!(saved["performanceMs"].as_u64().is_some());

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "grid-1",
        "attendance.grid",
        json!({ "classId": class_id, "month": "មេសា", "year": 2025 }),
    );
    assert_eq!(grid["monthNumber"].as_u64(), Some(4));
    assert_eq!(grid["daysInMonth"].as_u64(), Some(30));
    let students = grid["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    let row1 = &students[0];
    assert_eq!(row1["studentId"].as_str(), Some(s1.as_str()));
    assert_eq!(row1["attendance"]["1_M"]["displayValue"].as_str(), Some("A"));
    assert_eq!(row1["attendance"]["1_M"]["isSaved"].as_bool(), Some(true));
    assert_eq!(row1["attendance"]["1_M"]["status"].as_str(), Some("ABSENT"));
    assert!(row1["attendance"]["1_M"]["id"].as_str().is_some());
    assert_eq!(row1["totalAbsent"].as_u64(), Some(1));
    let row2 = &students[1];
    assert_eq!(row2["attendance"]["1_M"]["displayValue"].as_str(), Some("P"));
    assert_eq!(row2["totalPermission"].as_u64(), Some(1));

    // Identical resubmission is a no-op plan.
    let resaved = request_ok(
        &mut stdin,
        &mut reader,
        "save-2",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": [
                { "studentId": s1, "day": 1, "session": "M", "value": "A" },
                { "studentId": s2, "day": 1, "session": "M", "value": "P" }
            ]
        }),
    );
    assert_eq!(resaved["created"].as_u64(), Some(0));
    assert_eq!(resaved["updated"].as_u64(), Some(0));
    assert_eq!(resaved["deleted"].as_u64(), Some(0));
    assert_eq!(resaved["savedCount"].as_u64(), Some(0));

    // Clearing a marked cell deletes its record.
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "save-3",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": [
                { "studentId": s1, "day": 1, "session": "M", "value": "" }
            ]
        }),
    );
    assert_eq!(cleared["deleted"].as_u64(), Some(1));
    assert_eq!(cleared["created"].as_u64(), Some(0));
    assert_eq!(cleared["updated"].as_u64(), Some(0));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "grid-2",
        "attendance.grid",
        json!({ "classId": class_id, "month": "មេសា", "year": 2025 }),
    );
    let row1 = &grid["students"].as_array().expect("students")[0];
    assert_eq!(row1["attendance"]["1_M"]["displayValue"].as_str(), Some(""));
    assert_eq!(row1["attendance"]["1_M"]["isSaved"].as_bool(), Some(false));
    assert!(row1["attendance"]["1_M"]["id"].is_null());
    assert_eq!(row1["totalAbsent"].as_u64(), Some(0));
}

#[test]
fn status_flip_is_reported_as_update() {
    let workspace = temp_dir("attendanced-bulk-flip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s1, _s2) = seed_class(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save-1",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": [
                { "studentId": s1, "day": 10, "session": "A", "value": "A" }
            ]
        }),
    );

    let flipped = request_ok(
        &mut stdin,
        &mut reader,
        "save-2",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": [
                { "studentId": s1, "day": 10, "session": "A", "value": "P" }
            ]
        }),
    );
    assert_eq!(flipped["created"].as_u64(), Some(0));
    assert_eq!(flipped["updated"].as_u64(), Some(1));
    assert_eq!(flipped["deleted"].as_u64(), Some(0));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "grid",
        "attendance.grid",
        json!({ "classId": class_id, "month": "មេសា", "year": 2025 }),
    );
    let row1 = &grid["students"].as_array().expect("students")[0];
    assert_eq!(row1["attendance"]["10_A"]["displayValue"].as_str(), Some("P"));
    assert_eq!(row1["attendance"]["10_A"]["status"].as_str(), Some("PERMISSION"));
}

#[test]
fn empty_batch_and_incomplete_items_are_rejected_or_skipped() {
    let workspace = temp_dir("attendanced-bulk-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s1, _s2) = seed_class(&mut stdin, &mut reader, &workspace);

    let empty = request(
        &mut stdin,
        &mut reader,
        "save-empty",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": []
        }),
    );
    assert_eq!(empty["ok"].as_bool(), Some(false));
    assert_eq!(empty["error"]["code"].as_str(), Some("empty_batch"));

    // Items missing a field are skipped, not errors.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "save-skip",
        "attendance.bulkSave",
        json!({
            "classId": class_id,
            "month": "មេសា",
            "year": 2025,
            "monthNumber": 4,
            "attendance": [
                { "day": 2, "session": "M", "value": "A" },
                { "studentId": s1, "session": "M", "value": "A" },
                { "studentId": s1, "day": 2, "value": "A" },
                { "studentId": s1, "day": 2, "session": "M", "value": "A" }
            ]
        }),
    );
    assert_eq!(saved["created"].as_u64(), Some(1));
    assert_eq!(saved["savedCount"].as_u64(), Some(1));
}
