use chrono::{Duration, FixedOffset, Utc};
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
fn yesterday_backdated_stamp_is_flagged_as_drift() {
    let workspace = temp_dir("absenta-audit-drift");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let kelas = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "kelas.create",
        json!({ "nama_kelas": "X PM 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let siswa = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "siswa.create",
        json!({ "nis": "8001", "nama": "Putri", "kelasId": kelas }),
    )["id_siswa"]
        .as_str()
        .expect("id")
        .to_string();

    let wib = FixedOffset::east_opt(7 * 3600).expect("offset");
    let today = Utc::now().with_timezone(&wib).date_naive();
    let yesterday = today - Duration::days(1);

    // A stamp for today's date is clean; the same stamp dated yesterday but
    // captured now is exactly the one-day drift the audit exists to find.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "absensi.setStatus",
        json!({
            "siswaId": siswa,
            "tanggal": today.format("%Y-%m-%d").to_string(),
            "status": "hadir",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "absensi.setStatus",
        json!({
            "siswaId": siswa,
            "tanggal": yesterday.format("%Y-%m-%d").to_string(),
            "status": "izin",
        }),
    );

    let report = request_ok(&mut stdin, &mut reader, "6", "audit.dateDrift", json!({}));
    assert_eq!(report["scanned"].as_u64(), Some(2));
    assert_eq!(report["invalid"].as_u64(), Some(0));
    let findings = report["findings"].as_array().expect("findings");
    assert_eq!(findings.len(), 1, "unexpected findings: {}", report);
    assert_eq!(
        findings[0]["tanggal"].as_str(),
        Some(yesterday.format("%Y-%m-%d").to_string().as_str())
    );
    assert_eq!(findings[0]["drift_days"].as_i64(), Some(-1));
    assert_eq!(findings[0]["siswa_id"].as_str(), Some(siswa.as_str()));
}

#[test]
fn older_backfill_is_not_reported() {
    let workspace = temp_dir("absenta-audit-backfill");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let kelas = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "kelas.create",
        json!({ "nama_kelas": "X BR 1" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();
    let siswa = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "siswa.create",
        json!({ "nis": "8002", "nama": "Rani", "kelasId": kelas }),
    )["id_siswa"]
        .as_str()
        .expect("id")
        .to_string();

    let wib = FixedOffset::east_opt(7 * 3600).expect("offset");
    let today = Utc::now().with_timezone(&wib).date_naive();
    let last_week = today - Duration::days(7);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "absensi.setStatus",
        json!({
            "siswaId": siswa,
            "tanggal": last_week.format("%Y-%m-%d").to_string(),
            "status": "sakit",
        }),
    );

    let report = request_ok(&mut stdin, &mut reader, "5", "audit.dateDrift", json!({}));
    assert_eq!(report["scanned"].as_u64(), Some(1));
    assert_eq!(report["findings"].as_array().map(|a| a.len()), Some(0));
}
