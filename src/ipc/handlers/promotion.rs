use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, get_str_array, now_rfc3339};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{self, DetectError, Detection, KelasRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Candidate order is the class-list order the admin sees (name order), so
/// detection is deterministic for a given workspace.
fn fetch_kelas_rows(conn: &Connection) -> Result<Vec<KelasRow>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, nama_kelas, status, tingkat FROM kelas ORDER BY nama_kelas")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| {
        Ok(KelasRow {
            id: r.get(0)?,
            nama_kelas: r.get(1)?,
            status: r.get(2)?,
            tingkat: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn detection_json(d: &Detection) -> serde_json::Value {
    json!({
        "target": {
            "id": d.kelas.id,
            "nama_kelas": d.kelas.nama_kelas,
            "status": d.kelas.status,
            "tingkat": d.kelas.tingkat,
        },
        "strategy": d.strategy,
        "label": d.strategy.label(),
    })
}

fn detect_err(e: DetectError) -> HandlerErr {
    match e {
        DetectError::SourceNotFound => HandlerErr::not_found("kelas asal tidak ditemukan"),
        DetectError::SudahLulus { nama_kelas } => HandlerErr::new(
            "sudah_lulus",
            format!(
                "{} adalah kelas XII: siswa sudah lulus dan tidak dipromosikan",
                nama_kelas
            ),
        ),
        DetectError::TargetNotFound { expected } => {
            let message = match expected.as_deref() {
                Some(name) => format!("kelas tujuan tidak ditemukan, buat kelas {} dahulu", name),
                None => "kelas tujuan tidak ditemukan".to_string(),
            };
            let mut he = HandlerErr::new("target_not_found", message);
            if let Some(name) = expected {
                he = he.with_details(json!({ "expected": name }));
            }
            he
        }
    }
}

fn promotion_detect_target(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from_class_id = get_required_str(params, "fromClassId")?;
    let classes = fetch_kelas_rows(conn)?;
    let detection = promotion::detect_target(&from_class_id, &classes).map_err(detect_err)?;
    Ok(detection_json(&detection))
}

fn promotion_preview(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from_class_id = get_required_str(params, "fromClassId")?;
    let classes = fetch_kelas_rows(conn)?;
    let Some(source) = classes.iter().find(|k| k.id == from_class_id) else {
        return Err(HandlerErr::not_found("kelas asal tidak ditemukan"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, nis, nama, status FROM siswa
             WHERE kelas_id = ? ORDER BY nama, nis",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let siswa = stmt
        .query_map([&from_class_id], |r| {
            Ok(json!({
                "id_siswa": r.get::<_, String>(0)?,
                "nis": r.get::<_, String>(1)?,
                "nama": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    // Detection failure does not fail the preview: the admin still sees the
    // roster, with the blocking reason attached.
    let mut out = json!({
        "from": {
            "id": source.id,
            "nama_kelas": source.nama_kelas,
            "status": source.status,
            "tingkat": source.tingkat,
        },
        "siswa": siswa,
    });
    match promotion::detect_target(&from_class_id, &classes) {
        Ok(detection) => {
            out["detection"] = detection_json(&detection);
        }
        Err(e) => {
            let he = detect_err(e);
            out["detection"] = serde_json::Value::Null;
            out["blocked"] = json!({ "code": he.code, "message": he.message });
        }
    }
    Ok(out)
}

fn promotion_apply(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from_class_id = get_required_str(params, "fromClassId")?;
    let to_class_id = get_required_str(params, "toClassId")?;
    let student_ids = get_str_array(params, "studentIds")?;

    if from_class_id == to_class_id {
        return Err(HandlerErr::bad_params("kelas asal dan tujuan sama"));
    }
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("pilih minimal satu siswa"));
    }

    let source: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT nama_kelas, tingkat FROM kelas WHERE id = ?",
            [&from_class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((source_nama, source_tingkat)) = source else {
        return Err(HandlerErr::not_found("kelas asal tidak ditemukan"));
    };

    // Grade XII never promotes, whether the level comes from the name or
    // from the stored tingkat.
    let level = promotion::parse_class_name(&source_nama)
        .map(|p| p.level)
        .or(source_tingkat);
    if level.as_deref() == Some("XII") {
        return Err(HandlerErr::new(
            "sudah_lulus",
            format!(
                "{} adalah kelas XII: siswa sudah lulus dan tidak dipromosikan",
                source_nama
            ),
        ));
    }

    let target_nama: Option<String> = conn
        .query_row(
            "SELECT nama_kelas FROM kelas WHERE id = ?",
            [&to_class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(target_nama) = target_nama else {
        return Err(HandlerErr::not_found("kelas tujuan tidak ditemukan"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut moved = 0usize;
    for siswa_id in &student_ids {
        // Only students actually in the source class move; stale ids from
        // an outdated selection are skipped, not failed.
        let n = tx
            .execute(
                "UPDATE siswa SET kelas_id = ?, updated_at = ? WHERE id = ? AND kelas_id = ?",
                (&to_class_id, now_rfc3339(), siswa_id, &from_class_id),
            )
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        moved += n;
    }
    if moved == 0 {
        return Err(HandlerErr::not_found(
            "tidak ada siswa terpilih yang berada di kelas asal",
        ));
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({
        "message": format!("{} siswa dipindahkan ke {}", moved, target_nama),
        "moved": moved,
        "requested": student_ids.len(),
        "fromClassId": from_class_id,
        "toClassId": to_class_id,
    }))
}

fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.detectTarget" => Some(with_db(state, req, promotion_detect_target)),
        "promotion.preview" => Some(with_db(state, req, promotion_preview)),
        "promotion.apply" => Some(with_db(state, req, promotion_apply)),
        _ => None,
    }
}
