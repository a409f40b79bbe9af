use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, get_str_array, now_rfc3339, validate_tanggal,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

pub const STATUSES: &[&str] = &["hadir", "izin", "sakit", "alpa", "dispen"];

fn validate_absen_status(status: &str) -> Result<(), HandlerErr> {
    if STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(HandlerErr::bad_params(format!(
            "status must be one of hadir/izin/sakit/alpa/dispen, got {}",
            status
        )))
    }
}

fn kelas_exists(conn: &Connection, kelas_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM kelas WHERE id = ?", [kelas_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub(crate) fn upsert_absensi(
    conn: &Connection,
    siswa_id: &str,
    kelas_id: &str,
    tanggal: &str,
    status: &str,
    keterangan: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO absensi(id, siswa_id, kelas_id, tanggal, status, keterangan, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(siswa_id, tanggal) DO UPDATE SET
           status = excluded.status,
           keterangan = excluded.keterangan,
           kelas_id = excluded.kelas_id,
           updated_at = excluded.created_at",
        (
            Uuid::new_v4().to_string(),
            siswa_id,
            kelas_id,
            tanggal,
            status,
            keterangan,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "absensi" })))?;
    Ok(())
}

fn absensi_day_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    let tanggal = get_required_str(params, "tanggal")?;
    validate_tanggal(&tanggal)?;
    if !kelas_exists(conn, &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, nis, nama, status FROM siswa
             WHERE kelas_id = ? ORDER BY nama, nis",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let siswa = stmt
        .query_map([&kelas_id], |r| {
            Ok(json!({
                "id_siswa": r.get::<_, String>(0)?,
                "nis": r.get::<_, String>(1)?,
                "nama": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut stmt = conn
        .prepare(
            "SELECT siswa_id, status, keterangan FROM absensi
             WHERE kelas_id = ? AND tanggal = ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map((&kelas_id, &tanggal), |r| {
            Ok(json!({
                "id_siswa": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
                "keterangan": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({
        "kelasId": kelas_id,
        "tanggal": tanggal,
        "siswa": siswa,
        "rows": rows,
    }))
}

fn absensi_set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let siswa_id = get_required_str(params, "siswaId")?;
    let tanggal = get_required_str(params, "tanggal")?;
    let status = get_required_str(params, "status")?;
    let keterangan = get_opt_str(params, "keterangan");
    validate_tanggal(&tanggal)?;
    validate_absen_status(&status)?;

    let kelas_id: Option<String> = conn
        .query_row("SELECT kelas_id FROM siswa WHERE id = ?", [&siswa_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(kelas_id) = kelas_id else {
        return Err(HandlerErr::not_found("siswa not found"));
    };

    upsert_absensi(conn, &siswa_id, &kelas_id, &tanggal, &status, keterangan.as_deref())?;
    Ok(json!({ "ok": true }))
}

fn absensi_bulk_stamp(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    let tanggal = get_required_str(params, "tanggal")?;
    let status = get_required_str(params, "status")?;
    let student_ids = get_str_array(params, "studentIds")?;
    validate_tanggal(&tanggal)?;
    validate_absen_status(&status)?;
    if !kelas_exists(conn, &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut stamped = 0usize;
    for siswa_id in &student_ids {
        let exists = tx
            .query_row(
                "SELECT 1 FROM siswa WHERE kelas_id = ? AND id = ?",
                (&kelas_id, siswa_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_some();
        if !exists {
            continue;
        }
        upsert_absensi(&tx, siswa_id, &kelas_id, &tanggal, &status, None)?;
        stamped += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "stamped": stamped, "requested": student_ids.len() }))
}

pub fn recap_rows(
    conn: &Connection,
    kelas_id: &str,
    dari: &str,
    sampai: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, nis, nama FROM siswa
             WHERE kelas_id = ? ORDER BY nama, nis",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let roster = stmt
        .query_map([kelas_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut stmt = conn
        .prepare(
            "SELECT siswa_id, status, COUNT(*) FROM absensi
             WHERE kelas_id = ? AND tanggal >= ? AND tanggal <= ?
             GROUP BY siswa_id, status",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let counts = stmt
        .query_map((kelas_id, dari, sampai), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut by_siswa: HashMap<String, HashMap<String, i64>> = HashMap::new();
    for (siswa_id, status, n) in counts {
        by_siswa.entry(siswa_id).or_default().insert(status, n);
    }

    let rows = roster
        .into_iter()
        .map(|(id, nis, nama)| {
            let c = by_siswa.remove(&id).unwrap_or_default();
            let mut row = json!({
                "id_siswa": id,
                "nis": nis,
                "nama": nama,
            });
            let mut total = 0i64;
            for status in STATUSES {
                let n = c.get(*status).copied().unwrap_or(0);
                row[*status] = json!(n);
                total += n;
            }
            row["total"] = json!(total);
            row
        })
        .collect();

    Ok(rows)
}

fn absensi_recap(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    let dari = get_required_str(params, "dari")?;
    let sampai = get_required_str(params, "sampai")?;
    let dari_d = validate_tanggal(&dari)?;
    let sampai_d = validate_tanggal(&sampai)?;
    if dari_d > sampai_d {
        return Err(HandlerErr::bad_params("dari must not be after sampai"));
    }
    if !kelas_exists(conn, &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }

    let rows = recap_rows(conn, &kelas_id, &dari, &sampai)?;
    Ok(json!({
        "kelasId": kelas_id,
        "dari": dari,
        "sampai": sampai,
        "rows": rows,
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
        "absensi.dayOpen" => Some(with_db(state, req, absensi_day_open)),
        "absensi.setStatus" => Some(with_db(state, req, absensi_set_status)),
        "absensi.bulkStamp" => Some(with_db(state, req, absensi_bulk_stamp)),
        "absensi.recap" => Some(with_db(state, req, absensi_recap)),
        _ => None,
    }
}
