use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::kelas::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::siswa::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::guru::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::jadwal::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::absensi::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::banding::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::promotion::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::audit::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::laporan::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
