mod audit;
mod backup;
mod db;
mod ipc;
mod promotion;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

fn main() {
    // stdout carries the protocol; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    // Optional: pre-open a workspace so a supervisor can skip the
    // workspace.select round trip.
    if let Ok(path) = std::env::var("ABSENTA_WORKSPACE") {
        let path = PathBuf::from(path);
        match db::open_db(&path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.to_string_lossy(), "workspace preopened");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "failed to preopen workspace");
            }
        }
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "absentad started");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; ignore.
                tracing::warn!(error = %e, "bad request json");
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(method = %req.method, id = %req.id, "dispatch");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
