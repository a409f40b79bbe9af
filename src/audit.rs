//! Timezone-safety audit for attendance capture rows.
//!
//! Attendance rows store a calendar date (`tanggal`, the day the status is
//! for) and the capture timestamp. When a frontend or import path converted
//! timestamps through UTC instead of WIB (UTC+7), the stored date lands one
//! day off around midnight. The audit flags exactly that: rows whose date
//! differs from the WIB capture date by ±1 day. Larger gaps are deliberate
//! backfill and are left alone.

use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDate};

/// Western Indonesian Time, UTC+7. Fixed offset, no DST.
pub fn wib() -> FixedOffset {
    // 7 * 3600 is always in range for FixedOffset.
    FixedOffset::east_opt(7 * 3600).expect("UTC+7 offset")
}

/// Signed whole-day difference between a stored `YYYY-MM-DD` date and the
/// WIB calendar date of an RFC 3339 capture timestamp.
pub fn drift_days(tanggal: &str, captured_at: &str) -> anyhow::Result<i64> {
    let stored = NaiveDate::parse_from_str(tanggal, "%Y-%m-%d")
        .with_context(|| format!("invalid tanggal: {tanggal}"))?;
    let captured = DateTime::parse_from_rfc3339(captured_at)
        .with_context(|| format!("invalid capture timestamp: {captured_at}"))?;
    let captured_wib = captured.with_timezone(&wib()).date_naive();
    Ok((stored - captured_wib).num_days())
}

/// True when the difference is the classic UTC-vs-WIB off-by-one.
pub fn is_one_day_drift(days: i64) -> bool {
    days.abs() == 1
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftFinding {
    pub id: String,
    pub siswa_id: String,
    pub tanggal: String,
    pub captured_at: String,
    pub drift_days: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftReport {
    pub scanned: usize,
    /// Rows whose date or timestamp would not even parse. Counted rather
    /// than flagged as drift; they need manual repair either way.
    pub invalid: usize,
    pub findings: Vec<DriftFinding>,
}

/// Scans every attendance capture row and reports the drifted ones.
pub fn scan_absensi(conn: &rusqlite::Connection) -> anyhow::Result<DriftReport> {
    let mut stmt = conn
        .prepare("SELECT id, siswa_id, tanggal, created_at FROM absensi ORDER BY tanggal, siswa_id")
        .context("prepare absensi scan")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("scan absensi rows")?;

    let mut findings = Vec::new();
    let mut invalid = 0usize;
    let scanned = rows.len();
    for (id, siswa_id, tanggal, created_at) in rows {
        match drift_days(&tanggal, &created_at) {
            Ok(days) if is_one_day_drift(days) => findings.push(DriftFinding {
                id,
                siswa_id,
                tanggal,
                captured_at: created_at,
                drift_days: days,
            }),
            Ok(_) => {}
            Err(_) => invalid += 1,
        }
    }

    Ok(DriftReport {
        scanned,
        invalid,
        findings,
    })
}
