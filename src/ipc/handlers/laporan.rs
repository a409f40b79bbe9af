use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::absensi;
use crate::ipc::helpers::{get_opt_str, get_required_str, validate_tanggal};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::{Path, PathBuf};

fn export_recap(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = get_required_str(params, "kelasId")?;
    let dari = get_required_str(params, "dari")?;
    let sampai = get_required_str(params, "sampai")?;
    let dari_d = validate_tanggal(&dari)?;
    let sampai_d = validate_tanggal(&sampai)?;
    if dari_d > sampai_d {
        return Err(HandlerErr::bad_params("dari must not be after sampai"));
    }

    let nama_kelas: Option<String> = conn
        .query_row(
            "SELECT nama_kelas FROM kelas WHERE id = ?",
            [&kelas_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if nama_kelas.is_none() {
        return Err(HandlerErr::not_found("kelas not found"));
    }

    let rows = absensi::recap_rows(conn, &kelas_id, &dari, &sampai)?;

    let out_path = match get_opt_str(params, "outPath") {
        Some(p) => PathBuf::from(p),
        None => workspace
            .join("laporan")
            .join(format!("rekap-{}-{}-{}.csv", kelas_id, dari, sampai)),
    };
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    }

    let mut wtr = csv::Writer::from_path(&out_path)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    wtr.write_record([
        "nis", "nama", "hadir", "izin", "sakit", "alpa", "dispen", "total",
    ])
    .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    for row in &rows {
        let get_s = |k: &str| row.get(k).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let get_n = |k: &str| {
            row.get(k)
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                .to_string()
        };
        wtr.write_record([
            get_s("nis"),
            get_s("nama"),
            get_n("hadir"),
            get_n("izin"),
            get_n("sakit"),
            get_n("alpa"),
            get_n("dispen"),
            get_n("total"),
        ])
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    }
    wtr.flush()
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rows": rows.len(),
    }))
}

fn handle_export_recap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match export_recap(conn, workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "laporan.exportRecap" => Some(handle_export_recap(state, req)),
        _ => None,
    }
}
