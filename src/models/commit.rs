use chrono::NaiveDate;
use serde::Serialize;

use super::order::{OrderId, Period, SectorId, ServiceOrder, TechnicianId};
use super::slot::SlotCandidate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("slot belongs to sector {slot} but order {order_id} is in sector {order}")]
    SectorMismatch {
        order_id: OrderId,
        order: SectorId,
        slot: SectorId,
    },
    #[error("order {0} can no longer be scheduled")]
    NotSchedulable(OrderId),
}

/// A complete write-back payload; it can only be built from an order plus a slot
/// of that order's sector, so partial bookings never reach the ERP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleCommit {
    order_id: OrderId,
    technician_id: TechnicianId,
    sector_id: SectorId,
    date: NaiveDate,
    period: Period,
}

impl ScheduleCommit {
    pub fn new(order: &ServiceOrder, slot: &SlotCandidate) -> Result<Self, CommitError> {
        if !order.status.is_schedulable() {
            return Err(CommitError::NotSchedulable(order.id));
        }
        if slot.sector_id != order.sector_id {
            return Err(CommitError::SectorMismatch {
                order_id: order.id,
                order: order.sector_id,
                slot: slot.sector_id,
            });
        }
        Ok(Self {
            order_id: order.id,
            technician_id: slot.technician_id,
            sector_id: slot.sector_id,
            date: slot.date,
            period: slot.period,
        })
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn technician_id(&self) -> TechnicianId {
        self.technician_id
    }

    pub fn sector_id(&self) -> SectorId {
        self.sector_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn period(&self) -> Period {
        self.period
    }
}
