use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, get_required_text};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn nip_taken(conn: &Connection, nip: &str, exclude_id: Option<&str>) -> Result<bool, HandlerErr> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM guru WHERE nip = ?", [nip], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(match existing {
        Some(id) => exclude_id != Some(id.as_str()),
        None => false,
    })
}

fn guru_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, nip, nama, mapel, status FROM guru ORDER BY nama")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nip": r.get::<_, String>(1)?,
                "nama": r.get::<_, String>(2)?,
                "mapel": r.get::<_, Option<String>>(3)?,
                "status": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "guru": rows }))
}

fn guru_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let nip = get_required_text(params, "nip")?;
    let nama = get_required_text(params, "nama")?;
    let mapel = get_opt_str(params, "mapel");

    if nip_taken(conn, &nip, None)? {
        return Err(HandlerErr::new("nip_taken", format!("nip {} sudah terdaftar", nip)));
    }

    let guru_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO guru(id, nip, nama, mapel, status) VALUES(?, ?, ?, ?, 'aktif')",
        (&guru_id, &nip, &nama, &mapel),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "guru" })))?;

    Ok(json!({ "id": guru_id, "nip": nip, "nama": nama, "mapel": mapel, "status": "aktif" }))
}

fn guru_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let guru_id = get_required_str(params, "guruId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM guru WHERE id = ?", [&guru_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("guru not found"));
    }

    if let Some(nip) = get_opt_str(params, "nip") {
        let nip = nip.trim().to_string();
        if nip.is_empty() {
            return Err(HandlerErr::bad_params("nip must not be empty"));
        }
        if nip_taken(conn, &nip, Some(&guru_id))? {
            return Err(HandlerErr::new("nip_taken", format!("nip {} sudah terdaftar", nip)));
        }
        conn.execute("UPDATE guru SET nip = ? WHERE id = ?", (&nip, &guru_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(nama) = get_opt_str(params, "nama") {
        conn.execute("UPDATE guru SET nama = ? WHERE id = ?", (&nama, &guru_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(mapel) = get_opt_str(params, "mapel") {
        conn.execute("UPDATE guru SET mapel = ? WHERE id = ?", (&mapel, &guru_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(status) = get_opt_str(params, "status") {
        if status != "aktif" && status != "nonaktif" {
            return Err(HandlerErr::bad_params("status must be aktif or nonaktif"));
        }
        conn.execute("UPDATE guru SET status = ? WHERE id = ?", (&status, &guru_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }

    Ok(json!({ "ok": true }))
}

fn guru_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let guru_id = get_required_str(params, "guruId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM guru WHERE id = ?", [&guru_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("guru not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // Schedules keep their row but lose the teacher reference.
    tx.execute("UPDATE jadwal SET guru_id = NULL WHERE guru_id = ?", [&guru_id])
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute("DELETE FROM guru WHERE id = ?", [&guru_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "guru" })))?;
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
        "guru.list" => Some(with_db(state, req, |conn, _| guru_list(conn))),
        "guru.create" => Some(with_db(state, req, guru_create)),
        "guru.update" => Some(with_db(state, req, guru_update)),
        "guru.delete" => Some(with_db(state, req, guru_delete)),
        _ => None,
    }
}
