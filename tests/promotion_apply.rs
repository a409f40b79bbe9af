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
    let exe = env!("CARGO_BIN_EXE_absentad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn absentad");
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

#[test]
fn batch_move_updates_only_students_of_the_source_class() {
    let workspace = temp_dir("absenta-apply-move");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let from = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "kelas.create",
        json!({ "nama_kelas": "X RPL 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let to = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "kelas.create",
        json!({ "nama_kelas": "XI RPL 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "kelas.create",
        json!({ "nama_kelas": "X TKJ 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();

    let mut ids = Vec::new();
    for (i, (nis, nama)) in [("2001", "Citra"), ("2002", "Dewi"), ("2003", "Eka")]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "siswa.create",
            json!({ "nis": nis, "nama": nama, "kelasId": from }),
        );
        ids.push(created["id_siswa"].as_str().expect("id").to_string());
    }
    // A student of another class; a stale selection must not drag them along.
    let foreign = request_ok(
        &mut stdin,
        &mut reader,
        "s9",
        "siswa.create",
        json!({ "nis": "9999", "nama": "Fajar", "kelasId": other }),
    )["id_siswa"]
        .as_str()
        .expect("id")
        .to_string();

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "promotion.apply",
        json!({
            "fromClassId": from,
            "toClassId": to,
            "studentIds": [ids[0], ids[1], foreign],
        }),
    );
    assert_eq!(applied["moved"].as_u64(), Some(2));
    assert_eq!(applied["requested"].as_u64(), Some(3));
    assert!(applied["message"].as_str().unwrap_or("").contains("XI RPL 1"));

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "siswa.list",
        json!({ "kelasId": to }),
    );
    let moved_ids: Vec<&str> = moved
        .as_array()
        .expect("array")
        .iter()
        .map(|s| s["id_siswa"].as_str().expect("id"))
        .collect();
    assert_eq!(moved_ids.len(), 2);
    assert!(moved_ids.contains(&ids[0].as_str()));
    assert!(moved_ids.contains(&ids[1].as_str()));

    let left = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "siswa.list",
        json!({ "kelasId": from }),
    );
    assert_eq!(left.as_array().map(|a| a.len()), Some(1));

    let untouched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "siswa.list",
        json!({ "kelasId": other }),
    );
    assert_eq!(untouched.as_array().map(|a| a.len()), Some(1));
}

#[test]
fn apply_guards_block_invalid_requests() {
    let workspace = temp_dir("absenta-apply-guards");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let from = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "kelas.create",
        json!({ "nama_kelas": "X IPA 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let to = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "kelas.create",
        json!({ "nama_kelas": "XI IPA 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let siswa = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "siswa.create",
        json!({ "nis": "3001", "nama": "Gita", "kelasId": from }),
    )["id_siswa"]
        .as_str()
        .expect("id")
        .to_string();

    // Source equals target.
    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "promotion.apply",
        json!({ "fromClassId": from, "toClassId": from, "studentIds": [siswa] }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    // Empty selection.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "promotion.apply",
        json!({ "fromClassId": from, "toClassId": to, "studentIds": [] }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    // Unknown target class.
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "promotion.apply",
        json!({ "fromClassId": from, "toClassId": "missing", "studentIds": [siswa] }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));

    // Nothing actually moved: the only selected id is from another class.
    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "promotion.apply",
        json!({ "fromClassId": to, "toClassId": from, "studentIds": [siswa] }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));
}

#[test]
fn grade_twelve_source_is_blocked() {
    let workspace = temp_dir("absenta-apply-terminal");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let from = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "kelas.create",
        json!({ "nama_kelas": "XII AKL 2" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let to = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "kelas.create",
        json!({ "nama_kelas": "XI AKL 2" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let siswa = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "siswa.create",
        json!({ "nis": "4001", "nama": "Hana", "kelasId": from }),
    )["id_siswa"]
        .as_str()
        .expect("id")
        .to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "promotion.apply",
        json!({ "fromClassId": from, "toClassId": to, "studentIds": [siswa] }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("sudah_lulus"));

    // The student stayed put.
    let left = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "siswa.list",
        json!({ "kelasId": from }),
    );
    assert_eq!(left.as_array().map(|a| a.len()), Some(1));
}
