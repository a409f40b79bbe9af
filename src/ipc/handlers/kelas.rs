use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, get_required_text};
use crate::ipc::types::{AppState, Request};
use crate::promotion;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn validate_status(status: &str) -> Result<(), HandlerErr> {
    match status {
        "aktif" | "nonaktif" => Ok(()),
        other => Err(HandlerErr::bad_params(format!(
            "status must be aktif or nonaktif, got {}",
            other
        ))),
    }
}

fn derive_tingkat(nama_kelas: &str) -> Option<String> {
    promotion::parse_class_name(nama_kelas).map(|p| p.level)
}

fn kelas_exists(conn: &Connection, kelas_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM kelas WHERE id = ?", [kelas_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn kelas_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Include the student count so the dashboard list is useful on its own.
    // Correlated subquery to avoid double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               k.id,
               k.nama_kelas,
               k.status,
               k.tingkat,
               (SELECT COUNT(*) FROM siswa s WHERE s.kelas_id = k.id) AS siswa_count
             FROM kelas k
             ORDER BY k.nama_kelas",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "nama_kelas": row.get::<_, String>(1)?,
                "status": row.get::<_, String>(2)?,
                "tingkat": row.get::<_, Option<String>>(3)?,
                "siswa_count": row.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "kelas": rows }))
}

fn kelas_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let nama_kelas = get_required_text(params, "nama_kelas")?;
    let status = get_opt_str(params, "status").unwrap_or_else(|| "aktif".to_string());
    validate_status(&status)?;
    let tingkat = get_opt_str(params, "tingkat").or_else(|| derive_tingkat(&nama_kelas));

    let kelas_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO kelas(id, nama_kelas, status, tingkat) VALUES(?, ?, ?, ?)",
        (&kelas_id, &nama_kelas, &status, &tingkat),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "kelas" })))?;

    Ok(json!({
        "id": kelas_id,
        "nama_kelas": nama_kelas,
        "status": status,
        "tingkat": tingkat,
    }))
}

fn kelas_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    if !kelas_exists(conn, &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }

    let nama_kelas = match get_opt_str(params, "nama_kelas") {
        Some(v) => {
            let t = v.trim().to_string();
            if t.is_empty() {
                return Err(HandlerErr::bad_params("nama_kelas must not be empty"));
            }
            Some(t)
        }
        None => None,
    };
    let status = get_opt_str(params, "status");
    if let Some(s) = status.as_deref() {
        validate_status(s)?;
    }
    // Renaming re-derives tingkat unless the caller pins it explicitly.
    // A rename to an unparseable name clears it rather than keeping a stale
    // level.
    let tingkat: Option<Option<String>> = match get_opt_str(params, "tingkat") {
        Some(t) => Some(Some(t)),
        None => nama_kelas.as_deref().map(derive_tingkat),
    };

    if let Some(v) = nama_kelas.as_deref() {
        conn.execute(
            "UPDATE kelas SET nama_kelas = ? WHERE id = ?",
            (v, &kelas_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(v) = status.as_deref() {
        conn.execute("UPDATE kelas SET status = ? WHERE id = ?", (v, &kelas_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(v) = tingkat {
        conn.execute("UPDATE kelas SET tingkat = ? WHERE id = ?", (&v, &kelas_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }

    let row = conn
        .query_row(
            "SELECT id, nama_kelas, status, tingkat FROM kelas WHERE id = ?",
            [&kelas_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "nama_kelas": r.get::<_, String>(1)?,
                    "status": r.get::<_, String>(2)?,
                    "tingkat": r.get::<_, Option<String>>(3)?,
                }))
            },
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(row)
}

fn kelas_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    if !kelas_exists(conn, &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }

    let siswa_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM siswa WHERE kelas_id = ?",
            [&kelas_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if siswa_count > 0 {
        return Err(
            HandlerErr::new("kelas_not_empty", "pindahkan siswa terlebih dahulu")
                .with_details(json!({ "siswaCount": siswa_count })),
        );
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Explicit dependency order, no ON DELETE CASCADE.
    tx.execute("DELETE FROM jadwal WHERE kelas_id = ?", [&kelas_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "jadwal" })))?;
    tx.execute("DELETE FROM absensi WHERE kelas_id = ?", [&kelas_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "absensi" })))?;
    tx.execute("DELETE FROM kelas WHERE id = ?", [&kelas_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "kelas" })))?;

    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
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
        // An empty dashboard before workspace selection is fine; everything
        // mutating requires one.
        "kelas.list" => Some(match state.db.as_ref() {
            None => ok(&req.id, json!({ "kelas": [] })),
            Some(conn) => match kelas_list(conn) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            },
        }),
        "kelas.create" => Some(with_db(state, req, kelas_create)),
        "kelas.update" => Some(with_db(state, req, kelas_update)),
        "kelas.delete" => Some(with_db(state, req, kelas_delete)),
        _ => None,
    }
}
