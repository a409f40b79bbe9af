use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, get_required_text, validate_jam};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const HARI: &[&str] = &[
    "SENIN", "SELASA", "RABU", "KAMIS", "JUMAT", "SABTU", "MINGGU",
];

fn validate_hari(hari: &str) -> Result<String, HandlerErr> {
    let up = hari.trim().to_uppercase();
    if HARI.contains(&up.as_str()) {
        Ok(up)
    } else {
        Err(HandlerErr::bad_params(format!("hari tidak dikenal: {}", hari)))
    }
}

fn jadwal_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_opt_str(params, "kelasId");
    let sql = match kelas_id {
        Some(_) => {
            "SELECT id, kelas_id, guru_id, hari, jam_mulai, jam_selesai, mapel, ruangan
             FROM jadwal WHERE kelas_id = ? ORDER BY hari, jam_mulai"
        }
        None => {
            "SELECT id, kelas_id, guru_id, hari, jam_mulai, jam_selesai, mapel, ruangan
             FROM jadwal ORDER BY hari, jam_mulai"
        }
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "kelas_id": r.get::<_, String>(1)?,
            "guru_id": r.get::<_, Option<String>>(2)?,
            "hari": r.get::<_, String>(3)?,
            "jam_mulai": r.get::<_, String>(4)?,
            "jam_selesai": r.get::<_, String>(5)?,
            "mapel": r.get::<_, String>(6)?,
            "ruangan": r.get::<_, Option<String>>(7)?,
        }))
    };

    let rows = match kelas_id {
        Some(kid) => stmt
            .query_map([&kid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "jadwal": rows }))
}

fn jadwal_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    let hari = validate_hari(&get_required_str(params, "hari")?)?;
    let jam_mulai = get_required_str(params, "jamMulai")?;
    let jam_selesai = get_required_str(params, "jamSelesai")?;
    let mapel = get_required_text(params, "mapel")?;
    let guru_id = get_opt_str(params, "guruId");
    let ruangan = get_opt_str(params, "ruangan");

    let mulai = validate_jam(&jam_mulai)?;
    let selesai = validate_jam(&jam_selesai)?;
    if mulai >= selesai {
        return Err(HandlerErr::bad_params("jamMulai must be before jamSelesai"));
    }

    let kelas_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM kelas WHERE id = ?", [&kelas_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if kelas_ok.is_none() {
        return Err(HandlerErr::not_found("kelas not found"));
    }
    if let Some(gid) = guru_id.as_deref() {
        let guru_ok: Option<i64> = conn
            .query_row("SELECT 1 FROM guru WHERE id = ?", [gid], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if guru_ok.is_none() {
            return Err(HandlerErr::not_found("guru not found"));
        }
    }

    // Two entries clash when they share the day and their time ranges
    // overlap, for either the same class or the same room. HH:MM strings
    // compare correctly as text.
    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM jadwal
             WHERE hari = ?1
               AND jam_mulai < ?3
               AND jam_selesai > ?2
               AND (kelas_id = ?4 OR (ruangan IS NOT NULL AND ruangan = ?5))
             LIMIT 1",
            (&hari, &jam_mulai, &jam_selesai, &kelas_id, &ruangan),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(existing) = clash {
        return Err(
            HandlerErr::new("jadwal_bentrok", "jadwal bentrok dengan entri lain")
                .with_details(json!({ "jadwalId": existing })),
        );
    }

    let jadwal_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO jadwal(id, kelas_id, guru_id, hari, jam_mulai, jam_selesai, mapel, ruangan)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &jadwal_id,
            &kelas_id,
            &guru_id,
            &hari,
            &jam_mulai,
            &jam_selesai,
            &mapel,
            &ruangan,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "jadwal" })))?;

    Ok(json!({
        "id": jadwal_id,
        "kelas_id": kelas_id,
        "hari": hari,
        "jam_mulai": jam_mulai,
        "jam_selesai": jam_selesai,
        "mapel": mapel,
        "ruangan": ruangan,
    }))
}

fn jadwal_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let jadwal_id = get_required_str(params, "jadwalId")?;
    let n = conn
        .execute("DELETE FROM jadwal WHERE id = ?", [&jadwal_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("jadwal not found"));
    }
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
        "jadwal.list" => Some(with_db(state, req, jadwal_list)),
        "jadwal.create" => Some(with_db(state, req, jadwal_create)),
        "jadwal.delete" => Some(with_db(state, req, jadwal_delete)),
        _ => None,
    }
}
