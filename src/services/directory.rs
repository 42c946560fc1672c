use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Sector, SectorId, TechnicianId};

/// Read-mostly sector -> technician pool table, swapped wholesale on refresh.
#[derive(Debug, Default)]
pub struct SectorDirectory {
    sectors: RwLock<HashMap<SectorId, Sector>>,
}

impl SectorDirectory {
    pub fn new(sectors: impl IntoIterator<Item = Sector>) -> Self {
        let directory = Self::default();
        directory.replace(sectors);
        directory
    }

    /// Empty for unknown sectors; callers treat that as "no availability".
    pub fn technicians_for(&self, sector_id: SectorId) -> BTreeSet<TechnicianId> {
        self.sectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sector_id)
            .map(|s| s.technicians.clone())
            .unwrap_or_default()
    }

    pub fn sector(&self, sector_id: SectorId) -> Option<Sector> {
        self.sectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sector_id)
            .cloned()
    }

    /// Sector record for scheduling; unknown ids yield an empty standard sector.
    pub fn sector_or_empty(&self, sector_id: SectorId) -> Sector {
        self.sector(sector_id)
            .unwrap_or_else(|| Sector::new(sector_id, []))
    }

    pub fn replace(&self, sectors: impl IntoIterator<Item = Sector>) -> usize {
        let table: HashMap<SectorId, Sector> = sectors.into_iter().map(|s| (s.id, s)).collect();
        let count = table.len();
        *self.sectors.write().unwrap_or_else(PoisonError::into_inner) = table;
        count
    }

    pub fn reload(&self, conn: &Connection) -> anyhow::Result<usize> {
        let sectors = queries::load_sectors(conn)?;
        let count = self.replace(sectors);
        tracing::info!(sectors = count, "sector directory loaded");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.sectors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
