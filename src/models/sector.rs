use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::order::{Period, SectorId, TechnicianId};
use super::policy::ServiceCategory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeriodCaps {
    pub morning: u32,
    pub afternoon: u32,
}

impl PeriodCaps {
    pub const STANDARD: PeriodCaps = PeriodCaps {
        morning: 2,
        afternoon: 3,
    };

    pub fn for_period(&self, period: Period) -> u32 {
        match period {
            Period::Morning => self.morning,
            Period::Afternoon => self.afternoon,
        }
    }
}

impl Default for PeriodCaps {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Capacity rule of a sector, stored as JSON in the `sectors` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectorKind {
    #[default]
    Standard,
    InstallationOnly {
        #[serde(default)]
        caps: PeriodCaps,
        daily_cap: u32,
    },
    MaintenanceOnly {
        caps: PeriodCaps,
    },
    Mixed {
        daily_cap: u32,
        installation: PeriodCaps,
        maintenance: PeriodCaps,
    },
}

/// Per (technician, date, period) booking counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodLoad {
    pub installation: u32,
    pub maintenance: u32,
}

impl PeriodLoad {
    pub fn total(&self) -> u32 {
        self.installation + self.maintenance
    }

    pub fn of(&self, category: ServiceCategory) -> u32 {
        match category {
            ServiceCategory::Installation => self.installation,
            ServiceCategory::Maintenance => self.maintenance,
        }
    }

    pub fn add(&mut self, category: ServiceCategory) {
        match category {
            ServiceCategory::Installation => self.installation += 1,
            ServiceCategory::Maintenance => self.maintenance += 1,
        }
    }
}

impl SectorKind {
    /// Returns `(occupancy, capacity)` of a period for an order of `category`.
    ///
    /// Daily caps are folded into the returned capacity, so a slot is free
    /// exactly when `occupancy < capacity`.
    pub fn occupancy(
        &self,
        period: Period,
        category: ServiceCategory,
        this: PeriodLoad,
        other: PeriodLoad,
    ) -> (u32, u32) {
        match self {
            SectorKind::Standard => (this.total(), PeriodCaps::STANDARD.for_period(period)),
            SectorKind::MaintenanceOnly { caps } => (this.total(), caps.for_period(period)),
            SectorKind::InstallationOnly { caps, daily_cap } => {
                let occupancy = this.total();
                let day_room = daily_cap.saturating_sub(other.total());
                (occupancy, caps.for_period(period).min(day_room))
            }
            SectorKind::Mixed {
                daily_cap,
                installation,
                maintenance,
            } => {
                let sub_caps = match category {
                    ServiceCategory::Installation => installation,
                    ServiceCategory::Maintenance => maintenance,
                };
                let occupancy = this.of(category);
                let day_free = daily_cap.saturating_sub(this.total() + other.total());
                (
                    occupancy,
                    sub_caps.for_period(period).min(occupancy + day_free),
                )
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sector {
    pub id: SectorId,
    pub name: String,
    pub kind: SectorKind,
    pub technicians: BTreeSet<TechnicianId>,
}

impl Sector {
    pub fn new(id: SectorId, technicians: impl IntoIterator<Item = TechnicianId>) -> Self {
        Self {
            id,
            name: format!("setor {id}"),
            kind: SectorKind::Standard,
            technicians: technicians.into_iter().collect(),
        }
    }

    pub fn with_kind(mut self, kind: SectorKind) -> Self {
        self.kind = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(installation: u32, maintenance: u32) -> PeriodLoad {
        PeriodLoad {
            installation,
            maintenance,
        }
    }

    #[test]
    fn test_standard_caps() {
        let kind = SectorKind::Standard;
        let (occ, cap) = kind.occupancy(
            Period::Morning,
            ServiceCategory::Maintenance,
            load(1, 1),
            load(0, 0),
        );
        assert_eq!((occ, cap), (2, 2));
        let (_, cap) = kind.occupancy(
            Period::Afternoon,
            ServiceCategory::Maintenance,
            load(0, 0),
            load(0, 0),
        );
        assert_eq!(cap, 3);
    }

    #[test]
    fn test_installation_only_daily_cap() {
        let kind = SectorKind::InstallationOnly {
            caps: PeriodCaps::STANDARD,
            daily_cap: 4,
        };
        // Afternoon already holds 3, so only one morning visit fits the daily cap.
        let (occ, cap) = kind.occupancy(
            Period::Morning,
            ServiceCategory::Installation,
            load(0, 0),
            load(3, 0),
        );
        assert_eq!((occ, cap), (0, 1));
    }

    #[test]
    fn test_mixed_sub_caps_and_daily_cap() {
        let kind = SectorKind::Mixed {
            daily_cap: 5,
            installation: PeriodCaps {
                morning: 1,
                afternoon: 2,
            },
            maintenance: PeriodCaps {
                morning: 2,
                afternoon: 2,
            },
        };
        let (occ, cap) = kind.occupancy(
            Period::Morning,
            ServiceCategory::Installation,
            load(1, 0),
            load(0, 0),
        );
        assert!(occ >= cap);

        let (occ, cap) = kind.occupancy(
            Period::Morning,
            ServiceCategory::Maintenance,
            load(1, 0),
            load(1, 2),
        );
        // day total 4 of 5: one more maintenance visit allowed
        assert_eq!((occ, cap), (0, 1));
    }

    #[test]
    fn test_sector_kind_json() {
        let kind: SectorKind =
            serde_json::from_str(r#"{"kind":"installation_only","daily_cap":4}"#).unwrap();
        assert_eq!(
            kind,
            SectorKind::InstallationOnly {
                caps: PeriodCaps::STANDARD,
                daily_cap: 4
            }
        );
    }
}
