use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::absensi;
use crate::ipc::helpers::{get_opt_str, get_required_str, get_required_text, now_rfc3339, validate_tanggal};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn banding_submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let siswa_id = get_required_str(params, "siswaId")?;
    let tanggal = get_required_str(params, "tanggal")?;
    let status_diajukan = get_required_str(params, "statusDiajukan")?;
    let alasan = get_required_text(params, "alasan")?;
    validate_tanggal(&tanggal)?;
    if !absensi::STATUSES.contains(&status_diajukan.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "statusDiajukan must be one of hadir/izin/sakit/alpa/dispen, got {}",
            status_diajukan
        )));
    }

    let siswa_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM siswa WHERE id = ?", [&siswa_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if siswa_ok.is_none() {
        return Err(HandlerErr::not_found("siswa not found"));
    }

    let banding_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO banding_absen(id, siswa_id, tanggal, status_diajukan, alasan, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?)",
        (
            &banding_id,
            &siswa_id,
            &tanggal,
            &status_diajukan,
            &alasan,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "banding_absen" }))
    })?;

    Ok(json!({ "id": banding_id, "status": "pending" }))
}

fn banding_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filter = get_opt_str(params, "status");
    if let Some(f) = filter.as_deref() {
        if !matches!(f, "pending" | "disetujui" | "ditolak") {
            return Err(HandlerErr::bad_params(format!("unknown status filter: {}", f)));
        }
    }

    let sql = match filter {
        Some(_) => {
            "SELECT b.id, b.siswa_id, s.nis, s.nama, b.tanggal, b.status_diajukan,
                    b.alasan, b.status, b.catatan, b.created_at, b.decided_at
             FROM banding_absen b JOIN siswa s ON s.id = b.siswa_id
             WHERE b.status = ? ORDER BY b.created_at"
        }
        None => {
            "SELECT b.id, b.siswa_id, s.nis, s.nama, b.tanggal, b.status_diajukan,
                    b.alasan, b.status, b.catatan, b.created_at, b.decided_at
             FROM banding_absen b JOIN siswa s ON s.id = b.siswa_id
             ORDER BY b.created_at"
        }
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "id_siswa": r.get::<_, String>(1)?,
            "nis": r.get::<_, String>(2)?,
            "nama": r.get::<_, String>(3)?,
            "tanggal": r.get::<_, String>(4)?,
            "status_diajukan": r.get::<_, String>(5)?,
            "alasan": r.get::<_, String>(6)?,
            "status": r.get::<_, String>(7)?,
            "catatan": r.get::<_, Option<String>>(8)?,
            "created_at": r.get::<_, String>(9)?,
            "decided_at": r.get::<_, Option<String>>(10)?,
        }))
    };

    let rows = match get_opt_str(params, "status") {
        Some(f) => stmt
            .query_map([&f], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "banding": rows }))
}

fn banding_decide(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let banding_id = get_required_str(params, "bandingId")?;
    let keputusan = get_required_str(params, "keputusan")?;
    let catatan = get_opt_str(params, "catatan");
    if !matches!(keputusan.as_str(), "disetujui" | "ditolak") {
        return Err(HandlerErr::bad_params(format!(
            "keputusan must be disetujui or ditolak, got {}",
            keputusan
        )));
    }

    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT siswa_id, tanggal, status_diajukan, status
             FROM banding_absen WHERE id = ?",
            [&banding_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((siswa_id, tanggal, status_diajukan, status)) = row else {
        return Err(HandlerErr::not_found("banding not found"));
    };
    if status != "pending" {
        return Err(HandlerErr::new(
            "banding_sudah_diputuskan",
            format!("banding sudah {}", status),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute(
        "UPDATE banding_absen SET status = ?, catatan = ?, decided_at = ? WHERE id = ?",
        (&keputusan, &catatan, now_rfc3339(), &banding_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    // Approval rewrites the contested attendance row in the same transaction.
    if keputusan == "disetujui" {
        let kelas_id: Option<String> = tx
            .query_row("SELECT kelas_id FROM siswa WHERE id = ?", [&siswa_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        let Some(kelas_id) = kelas_id else {
            return Err(HandlerErr::not_found("siswa not found"));
        };
        absensi::upsert_absensi(
            &tx,
            &siswa_id,
            &kelas_id,
            &tanggal,
            &status_diajukan,
            Some("banding disetujui"),
        )?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "id": banding_id, "status": keputusan }))
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
        "banding.submit" => Some(with_db(state, req, banding_submit)),
        "banding.list" => Some(with_db(state, req, banding_list)),
        "banding.decide" => Some(with_db(state, req, banding_decide)),
        _ => None,
    }
}
