use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "absenta.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kelas(
            id TEXT PRIMARY KEY,
            nama_kelas TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'aktif',
            tingkat TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guru(
            id TEXT PRIMARY KEY,
            nip TEXT NOT NULL UNIQUE,
            nama TEXT NOT NULL,
            mapel TEXT,
            status TEXT NOT NULL DEFAULT 'aktif'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS siswa(
            id TEXT PRIMARY KEY,
            nis TEXT NOT NULL UNIQUE,
            nama TEXT NOT NULL,
            kelas_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'aktif',
            updated_at TEXT,
            FOREIGN KEY(kelas_id) REFERENCES kelas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_siswa_kelas ON siswa(kelas_id)",
        [],
    )?;

    // Existing workspaces may predate the updated_at column.
    ensure_siswa_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS jadwal(
            id TEXT PRIMARY KEY,
            kelas_id TEXT NOT NULL,
            guru_id TEXT,
            hari TEXT NOT NULL,
            jam_mulai TEXT NOT NULL,
            jam_selesai TEXT NOT NULL,
            mapel TEXT NOT NULL,
            ruangan TEXT,
            FOREIGN KEY(kelas_id) REFERENCES kelas(id),
            FOREIGN KEY(guru_id) REFERENCES guru(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jadwal_kelas ON jadwal(kelas_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jadwal_hari ON jadwal(hari)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absensi(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            kelas_id TEXT NOT NULL,
            tanggal TEXT NOT NULL,
            status TEXT NOT NULL,
            keterangan TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(siswa_id, tanggal),
            FOREIGN KEY(siswa_id) REFERENCES siswa(id),
            FOREIGN KEY(kelas_id) REFERENCES kelas(id)
        )",
        [],
    )?;
    ensure_absensi_keterangan(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absensi_kelas_tanggal ON absensi(kelas_id, tanggal)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absensi_siswa ON absensi(siswa_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS banding_absen(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            tanggal TEXT NOT NULL,
            status_diajukan TEXT NOT NULL,
            alasan TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            catatan TEXT,
            created_at TEXT NOT NULL,
            decided_at TEXT,
            FOREIGN KEY(siswa_id) REFERENCES siswa(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_banding_siswa ON banding_absen(siswa_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_banding_status ON banding_absen(status)",
        [],
    )?;

    Ok(conn)
}

fn ensure_siswa_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "siswa", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE siswa ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_absensi_keterangan(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "absensi", "keterangan")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE absensi ADD COLUMN keterangan TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
