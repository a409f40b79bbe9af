use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, get_required_text, now_rfc3339, pagination_json};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
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

fn kelas_exists(conn: &Connection, kelas_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM kelas WHERE id = ?", [kelas_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn nis_taken(conn: &Connection, nis: &str, exclude_id: Option<&str>) -> Result<bool, HandlerErr> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM siswa WHERE nis = ?", [nis], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(match existing {
        Some(id) => exclude_id != Some(id.as_str()),
        None => false,
    })
}

fn row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id_siswa": r.get::<_, String>(0)?,
        "nis": r.get::<_, String>(1)?,
        "nama": r.get::<_, String>(2)?,
        "kelas_id": r.get::<_, String>(3)?,
        "status": r.get::<_, String>(4)?,
    }))
}

/// Without `page` the result is a plain array; with it, a `{data, pagination}`
/// wrapper. Consumers of the original endpoint handle both shapes, so both
/// stay on the wire here.
fn siswa_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut where_parts: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(kelas_id) = get_opt_str(params, "kelasId") {
        where_parts.push("kelas_id = ?");
        args.push(Value::Text(kelas_id));
    }
    if let Some(q) = get_opt_str(params, "q") {
        let needle = format!("%{}%", q.trim());
        where_parts.push("(nis LIKE ? OR nama LIKE ?)");
        args.push(Value::Text(needle.clone()));
        args.push(Value::Text(needle));
    }

    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let page = params.get("page").and_then(|v| v.as_u64());
    let base = format!(
        "SELECT id, nis, nama, kelas_id, status FROM siswa{} ORDER BY nama, nis",
        where_sql
    );

    let Some(page) = page else {
        let mut stmt = conn
            .prepare(&base)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |r| row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        return Ok(json!(rows));
    };

    let page = page.max(1);
    let per_page = params
        .get("perPage")
        .and_then(|v| v.as_u64())
        .unwrap_or(20)
        .clamp(1, 200);

    let count_sql = format!("SELECT COUNT(*) FROM siswa{}", where_sql);
    let total: i64 = conn
        .query_row(&count_sql, params_from_iter(args.iter()), |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let paged = format!("{} LIMIT ? OFFSET ?", base);
    let mut paged_args = args;
    paged_args.push(Value::Integer(per_page as i64));
    paged_args.push(Value::Integer(((page - 1) * per_page) as i64));

    let mut stmt = conn
        .prepare(&paged)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params_from_iter(paged_args.iter()), |r| row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({
        "data": rows,
        "pagination": pagination_json(page, per_page, total as u64),
    }))
}

fn siswa_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let nis = get_required_text(params, "nis")?;
    let nama = get_required_text(params, "nama")?;
    let kelas_id = get_required_str(params, "kelasId")?;
    let status = get_opt_str(params, "status").unwrap_or_else(|| "aktif".to_string());
    validate_status(&status)?;

    if !kelas_exists(conn, &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }
    if nis_taken(conn, &nis, None)? {
        return Err(HandlerErr::new("nis_taken", format!("nis {} sudah terdaftar", nis)));
    }

    let siswa_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO siswa(id, nis, nama, kelas_id, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&siswa_id, &nis, &nama, &kelas_id, &status, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "siswa" })))?;

    Ok(json!({
        "id_siswa": siswa_id,
        "nis": nis,
        "nama": nama,
        "kelas_id": kelas_id,
        "status": status,
    }))
}

fn siswa_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let siswa_id = get_required_str(params, "siswaId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM siswa WHERE id = ?", [&siswa_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("siswa not found"));
    }

    if let Some(nis) = get_opt_str(params, "nis") {
        let nis = nis.trim().to_string();
        if nis.is_empty() {
            return Err(HandlerErr::bad_params("nis must not be empty"));
        }
        if nis_taken(conn, &nis, Some(&siswa_id))? {
            return Err(HandlerErr::new("nis_taken", format!("nis {} sudah terdaftar", nis)));
        }
        conn.execute("UPDATE siswa SET nis = ? WHERE id = ?", (&nis, &siswa_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(nama) = get_opt_str(params, "nama") {
        let nama = nama.trim().to_string();
        if nama.is_empty() {
            return Err(HandlerErr::bad_params("nama must not be empty"));
        }
        conn.execute("UPDATE siswa SET nama = ? WHERE id = ?", (&nama, &siswa_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(kelas_id) = get_opt_str(params, "kelasId") {
        if !kelas_exists(conn, &kelas_id)? {
            return Err(HandlerErr::not_found("kelas not found"));
        }
        conn.execute(
            "UPDATE siswa SET kelas_id = ? WHERE id = ?",
            (&kelas_id, &siswa_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(status) = get_opt_str(params, "status") {
        validate_status(&status)?;
        conn.execute(
            "UPDATE siswa SET status = ? WHERE id = ?",
            (&status, &siswa_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    conn.execute(
        "UPDATE siswa SET updated_at = ? WHERE id = ?",
        (now_rfc3339(), &siswa_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let row = conn
        .query_row(
            "SELECT id, nis, nama, kelas_id, status FROM siswa WHERE id = ?",
            [&siswa_id],
            |r| row_json(r),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(row)
}

fn siswa_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let siswa_id = get_required_str(params, "siswaId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM siswa WHERE id = ?", [&siswa_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("siswa not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Explicit dependency order, no ON DELETE CASCADE.
    tx.execute("DELETE FROM banding_absen WHERE siswa_id = ?", [&siswa_id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "banding_absen" }))
        })?;
    tx.execute("DELETE FROM absensi WHERE siswa_id = ?", [&siswa_id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "absensi" }))
        })?;
    tx.execute("DELETE FROM siswa WHERE id = ?", [&siswa_id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "siswa" }))
        })?;

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
        "siswa.list" => Some(with_db(state, req, siswa_list)),
        "siswa.create" => Some(with_db(state, req, siswa_create)),
        "siswa.update" => Some(with_db(state, req, siswa_update)),
        "siswa.delete" => Some(with_db(state, req, siswa_delete)),
        _ => None,
    }
}
