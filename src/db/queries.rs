use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use crate::models::{
    PriorityClass, SchedulingPolicy, Sector, SectorKind, ServiceCategory, Session,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Sessions ──

pub fn load_session(conn: &Connection, phone: &str) -> anyhow::Result<Option<Session>> {
    let mut stmt = conn.prepare("SELECT data FROM sessions WHERE phone = ?1")?;

    match stmt.query_row(params![phone], |row| row.get::<_, String>(0)) {
        Ok(data) => match serde_json::from_str::<Session>(&data) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // An unreadable row is treated as a fresh session rather than a hard failure.
                tracing::warn!(phone, error = %e, "discarding unreadable session row");
                Ok(None)
            }
        },
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    let data = serde_json::to_string(session)?;
    let last_activity = session.last_activity.format(TS_FORMAT).to_string();

    conn.execute(
        "INSERT INTO sessions (phone, data, last_activity)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(phone) DO UPDATE SET
           data = excluded.data,
           last_activity = excluded.last_activity",
        params![session.phone, data, last_activity],
    )?;
    Ok(())
}

pub fn delete_session(conn: &Connection, phone: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM sessions WHERE phone = ?1", params![phone])?;
    Ok(count > 0)
}

pub fn purge_sessions_before(conn: &Connection, cutoff: &NaiveDateTime) -> anyhow::Result<usize> {
    let cutoff = cutoff.format(TS_FORMAT).to_string();
    let count = conn.execute(
        "DELETE FROM sessions WHERE last_activity < ?1",
        params![cutoff],
    )?;
    Ok(count)
}

pub fn count_sessions(conn: &Connection) -> anyhow::Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
    Ok(count)
}

// ── Sectors ──

pub fn load_sectors(conn: &Connection) -> anyhow::Result<Vec<Sector>> {
    let mut stmt = conn.prepare("SELECT id, name, kind FROM sectors ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut sectors: BTreeMap<u64, Sector> = BTreeMap::new();
    for row in rows {
        let (id, name, kind_json) = row?;
        let kind = serde_json::from_str::<SectorKind>(&kind_json).unwrap_or_else(|e| {
            tracing::warn!(sector_id = id, error = %e, "invalid sector kind, using standard caps");
            SectorKind::Standard
        });
        sectors.insert(
            id as u64,
            Sector {
                id: id as u64,
                name,
                kind,
                technicians: Default::default(),
            },
        );
    }

    let mut stmt = conn.prepare("SELECT sector_id, technician_id FROM sector_technicians")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (sector_id, technician_id) = row?;
        if let Some(sector) = sectors.get_mut(&(sector_id as u64)) {
            sector.technicians.insert(technician_id as u64);
        }
    }

    Ok(sectors.into_values().collect())
}

pub fn upsert_sector(conn: &Connection, sector: &Sector) -> anyhow::Result<()> {
    let kind = serde_json::to_string(&sector.kind)?;
    conn.execute(
        "INSERT INTO sectors (id, name, kind) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, kind = excluded.kind",
        params![sector.id as i64, sector.name, kind],
    )?;
    conn.execute(
        "DELETE FROM sector_technicians WHERE sector_id = ?1",
        params![sector.id as i64],
    )?;
    for technician_id in &sector.technicians {
        conn.execute(
            "INSERT INTO sector_technicians (sector_id, technician_id) VALUES (?1, ?2)",
            params![sector.id as i64, *technician_id as i64],
        )?;
    }
    Ok(())
}

// ── Scheduling policies ──

pub fn load_policies(conn: &Connection) -> anyhow::Result<Vec<SchedulingPolicy>> {
    let mut stmt = conn.prepare(
        "SELECT subject_code, min_lead_days, max_lead_days, priority_class, category
         FROM scheduling_policies ORDER BY subject_code",
    )?;
    let rows = stmt.query_map([], |row| {
        let category: String = row.get(4)?;
        Ok(SchedulingPolicy {
            subject_code: row.get::<_, i64>(0)? as u32,
            min_lead_days: row.get::<_, i64>(1)?.max(0) as u32,
            max_lead_days: row.get::<_, i64>(2)?.max(0) as u32,
            priority: PriorityClass::from_code(row.get(3)?),
            category: ServiceCategory::parse(&category),
        })
    })?;

    let mut policies = vec![];
    for row in rows {
        policies.push(row?);
    }
    Ok(policies)
}

pub fn upsert_policy(conn: &Connection, policy: &SchedulingPolicy) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO scheduling_policies (subject_code, min_lead_days, max_lead_days, priority_class, category)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(subject_code) DO UPDATE SET
           min_lead_days = excluded.min_lead_days,
           max_lead_days = excluded.max_lead_days,
           priority_class = excluded.priority_class,
           category = excluded.category",
        params![
            policy.subject_code as i64,
            policy.min_lead_days as i64,
            policy.max_lead_days as i64,
            policy.priority.code(),
            policy.category.as_str(),
        ],
    )?;
    Ok(())
}
