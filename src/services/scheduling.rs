use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{
    Booking, SchedulingPolicy, Sector, ServiceOrder, SlotConstraints, Suggestion,
};
use crate::services::allocator::SlotAllocator;
use crate::services::calendar::BusinessCalendar;
use crate::services::directory::SectorDirectory;
use crate::services::erp::ErpClient;
use crate::services::policy::PolicyResolver;

/// Wires the calendar, policy table, sector directory and ERP bookings into
/// the allocator.
pub struct SchedulingService {
    calendar: BusinessCalendar,
    policies: PolicyResolver,
    directory: Arc<SectorDirectory>,
    erp: Arc<dyn ErpClient>,
}

impl SchedulingService {
    pub fn new(
        calendar: BusinessCalendar,
        policies: PolicyResolver,
        directory: Arc<SectorDirectory>,
        erp: Arc<dyn ErpClient>,
    ) -> Self {
        Self {
            calendar,
            policies,
            directory,
            erp,
        }
    }

    pub fn erp(&self) -> &dyn ErpClient {
        self.erp.as_ref()
    }

    pub fn policy_for(&self, order: &ServiceOrder) -> &SchedulingPolicy {
        self.policies.resolve(order.subject_code)
    }

    /// Capacity already consumed in `[from, to]` by the sector's technicians.
    /// The order's own booking is left out so a reschedule can keep its slot.
    pub async fn bookings(
        &self,
        order: &ServiceOrder,
        sector: &Sector,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<Booking>> {
        if sector.technicians.is_empty() {
            return Ok(Vec::new());
        }
        let scheduled = self
            .erp
            .scheduled_orders(&sector.technicians, from, to)
            .await?;
        let bookings = scheduled
            .iter()
            .filter(|o| o.id != order.id)
            .filter_map(|o| {
                let category = self.policies.resolve(o.subject_code).category;
                Booking::from_order(o, category)
            })
            .collect();
        Ok(bookings)
    }

    pub async fn suggest_for(
        &self,
        order: &ServiceOrder,
        now: NaiveDateTime,
        constraints: SlotConstraints,
    ) -> anyhow::Result<Suggestion> {
        let policy = self.policy_for(order);
        let allocator = SlotAllocator::new(&self.calendar);
        let Some((from, to)) = allocator.window(policy, now, constraints) else {
            tracing::info!(
                order_id = order.id,
                subject_code = order.subject_code,
                pinned = ?constraints.date,
                "empty scheduling window"
            );
            return Ok(Suggestion::empty());
        };

        let sector = self.directory.sector_or_empty(order.sector_id);
        if sector.technicians.is_empty() {
            tracing::warn!(
                order_id = order.id,
                sector_id = order.sector_id,
                "sector has no technicians"
            );
        }
        let bookings = self.bookings(order, &sector, from, to).await?;

        Ok(allocator.suggest(order, policy, &sector, &bookings, now, constraints))
    }

    /// Pinned request, widened to the whole window when the pin finds nothing.
    pub async fn suggest_or_widen(
        &self,
        order: &ServiceOrder,
        now: NaiveDateTime,
        constraints: SlotConstraints,
    ) -> anyhow::Result<(Suggestion, bool)> {
        let pinned = self.suggest_for(order, now, constraints).await?;
        if !pinned.is_empty() || constraints == SlotConstraints::none() {
            return Ok((pinned, false));
        }
        if constraints.date.is_some() {
            let same_day = self
                .suggest_for(order, now, SlotConstraints { period: None, ..constraints })
                .await?;
            if !same_day.is_empty() {
                return Ok((same_day, true));
            }
        }
        let open = self.suggest_for(order, now, SlotConstraints::none()).await?;
        Ok((open, true))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{
        ClientId, OrderId, OrderStatus, Period, PriorityClass, ScheduleCommit,
        ServiceCategory, TechnicianId,
    };
    use crate::services::erp::{Customer, ErpWriteResult};

    /// In-memory ERP shared by the service-level tests.
    #[derive(Default)]
    pub struct FakeErp {
        pub customers: Vec<Customer>,
        pub orders: Mutex<Vec<ServiceOrder>>,
        pub commits: Mutex<Vec<ScheduleCommit>>,
        pub reject_with: Option<String>,
        pub down: bool,
    }

    impl FakeErp {
        fn check(&self) -> anyhow::Result<()> {
            if self.down {
                anyhow::bail!("ERP timed out");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ErpClient for FakeErp {
        async fn find_customer_by_cpf(&self, cpf: &str) -> anyhow::Result<Option<Customer>> {
            self.check()?;
            Ok(self.customers.iter().find(|c| c.cpf == cpf).cloned())
        }

        async fn orders_for_customer(&self, client_id: ClientId) -> anyhow::Result<Vec<ServiceOrder>> {
            self.check()?;
            let orders = self.orders.lock().unwrap();
            Ok(orders.iter().filter(|o| o.client_id == client_id).cloned().collect())
        }

        async fn order(&self, order_id: OrderId) -> anyhow::Result<Option<ServiceOrder>> {
            self.check()?;
            let orders = self.orders.lock().unwrap();
            Ok(orders.iter().find(|o| o.id == order_id).cloned())
        }

        async fn scheduled_orders(
            &self,
            technicians: &BTreeSet<TechnicianId>,
            from: NaiveDate,
            to: NaiveDate,
        ) -> anyhow::Result<Vec<ServiceOrder>> {
            self.check()?;
            let orders = self.orders.lock().unwrap();
            Ok(orders
                .iter()
                .filter(|o| o.status == OrderStatus::Scheduled)
                .filter(|o| o.technician_id.is_some_and(|t| technicians.contains(&t)))
                .filter(|o| o.scheduled_date.is_some_and(|d| d >= from && d <= to))
                .cloned()
                .collect())
        }

        async fn commit_schedule(&self, commit: &ScheduleCommit) -> anyhow::Result<ErpWriteResult> {
            self.check()?;
            if let Some(message) = &self.reject_with {
                return Ok(ErpWriteResult {
                    success: false,
                    message: Some(message.clone()),
                });
            }
            let mut orders = self.orders.lock().unwrap();
            if let Some(order) = orders.iter_mut().find(|o| o.id == commit.order_id()) {
                order.status = OrderStatus::Scheduled;
                order.technician_id = Some(commit.technician_id());
                order.scheduled_date = Some(commit.date());
                order.scheduled_period = Some(commit.period());
            }
            self.commits.lock().unwrap().push(commit.clone());
            Ok(ErpWriteResult {
                success: true,
                message: None,
            })
        }
    }

    pub fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn open_order(id: OrderId, client_id: ClientId, sector_id: u64) -> ServiceOrder {
        ServiceOrder {
            id,
            client_id,
            sector_id,
            subject_code: 0,
            status: OrderStatus::Open,
            created_at: dt("2025-06-13 10:00"),
            technician_id: None,
            scheduled_date: None,
            scheduled_period: None,
            preferred_period: Some(Period::Morning),
            description: Some("sem conexão".to_string()),
        }
    }

    pub fn scheduled(id: OrderId, tech: TechnicianId, on: &str, period: Period) -> ServiceOrder {
        ServiceOrder {
            status: OrderStatus::Scheduled,
            technician_id: Some(tech),
            scheduled_date: Some(date(on)),
            scheduled_period: Some(period),
            ..open_order(id, 999, 1)
        }
    }

    pub fn service(erp: Arc<FakeErp>) -> SchedulingService {
        let directory = SectorDirectory::new([Sector::new(1, [10]), Sector::new(2, Vec::<TechnicianId>::new())]);
        let policies = PolicyResolver::new([SchedulingPolicy {
            subject_code: 0,
            min_lead_days: 1,
            max_lead_days: 5,
            priority: PriorityClass::Soonest,
            category: ServiceCategory::Maintenance,
        }]);
        SchedulingService::new(
            BusinessCalendar::default(),
            policies,
            Arc::new(directory),
            erp,
        )
    }

    #[tokio::test]
    async fn test_suggest_counts_erp_bookings() {
        // Monday; the window starts Tuesday 2025-06-17
        let now = dt("2025-06-16 09:00");
        let erp = Arc::new(FakeErp::default());
        {
            let mut orders = erp.orders.lock().unwrap();
            orders.push(scheduled(500, 10, "2025-06-17", Period::Morning));
            orders.push(scheduled(501, 10, "2025-06-17", Period::Morning));
        }
        let svc = service(erp);
        let order = open_order(1, 7, 1);

        let suggestion = svc
            .suggest_for(&order, now, SlotConstraints::none())
            .await
            .unwrap();
        let primary = suggestion.primary.unwrap();
        assert_eq!(primary.date, date("2025-06-17"));
        assert_eq!(primary.period, Period::Afternoon);
    }

    #[tokio::test]
    async fn test_own_booking_does_not_block_reschedule() {
        let now = dt("2025-06-16 09:00");
        let erp = Arc::new(FakeErp::default());
        {
            let mut orders = erp.orders.lock().unwrap();
            orders.push(scheduled(500, 10, "2025-06-17", Period::Morning));
            orders.push(scheduled(1, 10, "2025-06-17", Period::Morning));
        }
        let svc = service(erp);
        let mut order = scheduled(1, 10, "2025-06-17", Period::Morning);
        order.client_id = 7;

        let suggestion = svc
            .suggest_for(&order, now, SlotConstraints::exact(date("2025-06-17"), Period::Morning))
            .await
            .unwrap();
        let primary = suggestion.primary.unwrap();
        assert_eq!(primary.occupancy, 1);
    }

    #[tokio::test]
    async fn test_empty_sector_skips_erp() {
        let erp = Arc::new(FakeErp {
            down: true,
            ..FakeErp::default()
        });
        let svc = service(erp);
        let order = open_order(1, 7, 2);
        let suggestion = svc
            .suggest_for(&order, dt("2025-06-16 09:00"), SlotConstraints::none())
            .await
            .unwrap();
        assert!(suggestion.is_empty());
        assert!(suggestion.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_erp_failure_propagates() {
        let erp = Arc::new(FakeErp {
            down: true,
            ..FakeErp::default()
        });
        let svc = service(erp);
        let order = open_order(1, 7, 1);
        let result = svc
            .suggest_for(&order, dt("2025-06-16 09:00"), SlotConstraints::none())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_widen_when_pin_is_full() {
        let now = dt("2025-06-16 09:00");
        let erp = Arc::new(FakeErp::default());
        {
            let mut orders = erp.orders.lock().unwrap();
            orders.push(scheduled(500, 10, "2025-06-18", Period::Morning));
            orders.push(scheduled(501, 10, "2025-06-18", Period::Morning));
        }
        let svc = service(erp);
        let order = open_order(1, 7, 1);

        let (suggestion, widened) = svc
            .suggest_or_widen(&order, now, SlotConstraints::exact(date("2025-06-18"), Period::Morning))
            .await
            .unwrap();
        assert!(widened);
        let primary = suggestion.primary.unwrap();
        assert_eq!(primary.date, date("2025-06-18"));
        assert_eq!(primary.period, Period::Afternoon);
    }
}
