use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::models::{
    Booking, Period, PeriodLoad, PriorityClass, SchedulingPolicy, Sector, ServiceOrder,
    SlotCandidate, SlotConstraints, Suggestion, TechnicianId,
};
use crate::services::calendar::BusinessCalendar;

type SlotKey = (TechnicianId, NaiveDate, Period);

/// Enumerates and ranks offerable (technician, date, period) slots.
///
/// Stateless: every call works only on its arguments, so one allocator can be
/// shared across sessions.
#[derive(Debug, Clone, Copy)]
pub struct SlotAllocator<'a> {
    calendar: &'a BusinessCalendar,
}

impl<'a> SlotAllocator<'a> {
    pub fn new(calendar: &'a BusinessCalendar) -> Self {
        Self { calendar }
    }

    /// Business-day bounds to search, or `None` when nothing can be offered.
    pub fn window(
        &self,
        policy: &SchedulingPolicy,
        now: NaiveDateTime,
        constraints: SlotConstraints,
    ) -> Option<(NaiveDate, NaiveDate)> {
        if policy.max_lead_days < 1 {
            return None;
        }
        let min_date = self
            .calendar
            .add_business_days(now.date(), policy.min_lead_days)
            .ok()?;
        let max_date = self
            .calendar
            .add_business_days(min_date, policy.max_lead_days)
            .ok()?;

        match constraints.date {
            Some(date) => {
                let allowed = self.calendar.is_business_day(date)
                    && date >= min_date
                    && date <= max_date;
                allowed.then_some((date, date))
            }
            None => Some((min_date, max_date)),
        }
    }

    /// SLA window anchored on the order's creation date.
    pub fn sla_window(
        &self,
        order: &ServiceOrder,
        policy: &SchedulingPolicy,
    ) -> Option<(NaiveDate, NaiveDate)> {
        let opened = order.created_at.date();
        let start = opened.checked_add_signed(Duration::days(policy.min_lead_days as i64))?;
        let end = self
            .calendar
            .add_business_days(opened, policy.max_lead_days)
            .ok()?;
        Some((start, end.max(start)))
    }

    pub fn suggest(
        &self,
        order: &ServiceOrder,
        policy: &SchedulingPolicy,
        sector: &Sector,
        bookings: &[Booking],
        now: NaiveDateTime,
        constraints: SlotConstraints,
    ) -> Suggestion {
        let Some((min_date, max_date)) = self.window(policy, now, constraints) else {
            return Suggestion::empty();
        };

        let mut load: HashMap<SlotKey, PeriodLoad> = HashMap::new();
        for b in bookings {
            if !sector.technicians.contains(&b.technician_id) {
                continue;
            }
            if b.date < min_date || b.date > max_date {
                continue;
            }
            load.entry((b.technician_id, b.date, b.period))
                .or_default()
                .add(b.category);
        }
        let load_of = |key: SlotKey| load.get(&key).copied().unwrap_or_default();

        let days = self.calendar.business_days(min_date, max_date);
        let mut candidates = Vec::new();
        for &technician_id in &sector.technicians {
            for &date in &days {
                for period in Period::ALL {
                    if constraints.period.is_some_and(|p| p != period) {
                        continue;
                    }
                    let this = load_of((technician_id, date, period));
                    let other = load_of((technician_id, date, other_period(period)));
                    let (occupancy, capacity) =
                        sector.kind.occupancy(period, policy.category, this, other);
                    if occupancy < capacity {
                        candidates.push(SlotCandidate {
                            technician_id,
                            sector_id: sector.id,
                            date,
                            period,
                            occupancy,
                            capacity,
                        });
                    }
                }
            }
        }

        let preferred = preferred_period(order, now);
        candidates.sort_by_key(|c| (c.date, c.period != preferred, c.occupancy, c.technician_id));

        let Some(index) = self.primary_index(&candidates, order, policy, max_date) else {
            return Suggestion {
                primary: None,
                alternatives: Vec::new(),
                window: Some((min_date, max_date)),
            };
        };
        let primary = candidates.remove(index);

        tracing::debug!(
            order_id = order.id,
            technician_id = primary.technician_id,
            date = %primary.date,
            period = primary.period.as_str(),
            alternatives = candidates.len(),
            "slot suggestion computed"
        );

        Suggestion {
            primary: Some(primary),
            alternatives: candidates,
            window: Some((min_date, max_date)),
        }
    }

    fn primary_index(
        &self,
        sorted: &[SlotCandidate],
        order: &ServiceOrder,
        policy: &SchedulingPolicy,
        max_date: NaiveDate,
    ) -> Option<usize> {
        let last = sorted.len().checked_sub(1)?;
        let index = match policy.priority {
            PriorityClass::Soonest => 0,
            PriorityClass::MidWindow => {
                let midpoint = self
                    .sla_window(order, policy)
                    .map(|(start, end)| start + Duration::days((end - start).num_days() / 2));
                midpoint
                    .and_then(|mid| sorted.iter().position(|c| c.date >= mid))
                    .unwrap_or(last)
            }
            PriorityClass::LatestInWindow => sorted
                .iter()
                .rposition(|c| c.date == max_date)
                .unwrap_or(last),
        };
        Some(index)
    }
}

fn other_period(period: Period) -> Period {
    match period {
        Period::Morning => Period::Afternoon,
        Period::Afternoon => Period::Morning,
    }
}

/// The order's stated preference, else the half of the day we are in.
pub fn preferred_period(order: &ServiceOrder, now: NaiveDateTime) -> Period {
    order.preferred_period.unwrap_or(if now.hour() < 12 {
        Period::Morning
    } else {
        Period::Afternoon
    })
}
