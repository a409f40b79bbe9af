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
fn overlapping_entries_for_class_or_room_are_rejected() {
    let workspace = temp_dir("absenta-jadwal");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let kelas_a = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "kelas.create",
        json!({ "nama_kelas": "X RPL 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let kelas_b = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "kelas.create",
        json!({ "nama_kelas": "X RPL 2" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let guru = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "guru.create",
        json!({ "nip": "198001012005011001", "nama": "Pak Tono", "mapel": "Matematika" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "jadwal.create",
        json!({
            "kelasId": kelas_a,
            "guruId": guru,
            "hari": "senin",
            "jamMulai": "07:00",
            "jamSelesai": "08:30",
            "mapel": "Matematika",
            "ruangan": "R-101",
        }),
    );

    // Same class, overlapping time.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "jadwal.create",
        json!({
            "kelasId": kelas_a,
            "hari": "SENIN",
            "jamMulai": "08:00",
            "jamSelesai": "09:00",
            "mapel": "Fisika",
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("jadwal_bentrok"));

    // Different class, same room, overlapping time.
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "jadwal.create",
        json!({
            "kelasId": kelas_b,
            "hari": "SENIN",
            "jamMulai": "08:00",
            "jamSelesai": "09:00",
            "mapel": "Kimia",
            "ruangan": "R-101",
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("jadwal_bentrok"));

    // Back-to-back is not a clash; neither is another day.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "jadwal.create",
        json!({
            "kelasId": kelas_a,
            "hari": "SENIN",
            "jamMulai": "08:30",
            "jamSelesai": "10:00",
            "mapel": "Fisika",
            "ruangan": "R-101",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "jadwal.create",
        json!({
            "kelasId": kelas_b,
            "hari": "SELASA",
            "jamMulai": "07:00",
            "jamSelesai": "08:30",
            "mapel": "Kimia",
            "ruangan": "R-101",
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "jadwal.list",
        json!({ "kelasId": kelas_a }),
    );
    assert_eq!(listed["jadwal"].as_array().map(|a| a.len()), Some(2));

    // Malformed time and unknown day.
    let resp = request(
        &mut stdin,
        &mut reader,
        "11",
        "jadwal.create",
        json!({
            "kelasId": kelas_a,
            "hari": "SENIN",
            "jamMulai": "7am",
            "jamSelesai": "08:00",
            "mapel": "PKN",
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));
    let resp = request(
        &mut stdin,
        &mut reader,
        "12",
        "jadwal.create",
        json!({
            "kelasId": kelas_a,
            "hari": "FUNDAY",
            "jamMulai": "07:00",
            "jamSelesai": "08:00",
            "mapel": "PKN",
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));
}
