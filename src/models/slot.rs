use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::order::{OrderStatus, Period, SectorId, ServiceOrder, TechnicianId};
use super::policy::ServiceCategory;

/// An occupied (technician, date, period) unit, derived from a scheduled order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub technician_id: TechnicianId,
    pub date: NaiveDate,
    pub period: Period,
    pub category: ServiceCategory,
}

impl Booking {
    /// Only scheduled orders carrying technician, date and period occupy capacity.
    pub fn from_order(order: &ServiceOrder, category: ServiceCategory) -> Option<Self> {
        if order.status != OrderStatus::Scheduled {
            return None;
        }
        Some(Self {
            technician_id: order.technician_id?,
            date: order.scheduled_date?,
            period: order.scheduled_period?,
            category,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotCandidate {
    pub technician_id: TechnicianId,
    pub sector_id: SectorId,
    pub date: NaiveDate,
    pub period: Period,
    pub occupancy: u32,
    pub capacity: u32,
}

impl SlotCandidate {
    pub fn same_slot(&self, date: NaiveDate, period: Period) -> bool {
        self.date == date && self.period == period
    }
}

/// Optional pins for a suggestion request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotConstraints {
    pub date: Option<NaiveDate>,
    pub period: Option<Period>,
}

impl SlotConstraints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn exact(date: NaiveDate, period: Period) -> Self {
        Self {
            date: Some(date),
            period: Some(period),
        }
    }

    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            period: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Suggestion {
    pub primary: Option<SlotCandidate>,
    pub alternatives: Vec<SlotCandidate>,
    /// Business-day bounds that were searched; `None` when the window was empty.
    pub window: Option<(NaiveDate, NaiveDate)>,
}

impl Suggestion {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }

    /// Primary followed by the alternatives.
    pub fn candidates(&self) -> Vec<SlotCandidate> {
        self.primary
            .iter()
            .chain(self.alternatives.iter())
            .cloned()
            .collect()
    }

    /// Distinct (date, period) pairs in ranking order, at most `limit`.
    pub fn distinct_slots(&self, limit: usize) -> Vec<(NaiveDate, Period)> {
        distinct_slots(&self.candidates(), limit)
    }
}

pub fn distinct_slots(candidates: &[SlotCandidate], limit: usize) -> Vec<(NaiveDate, Period)> {
    let mut out: Vec<(NaiveDate, Period)> = Vec::new();
    for c in candidates {
        if out.len() >= limit {
            break;
        }
        if !out.iter().any(|(d, p)| c.same_slot(*d, *p)) {
            out.push((c.date, c.period));
        }
    }
    out
}
