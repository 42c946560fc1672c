pub mod http;
pub mod normalize;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ClientId, OrderId, ScheduleCommit, ServiceOrder, TechnicianId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: ClientId,
    pub name: String,
    pub cpf: String,
}

/// Result of an ERP write-back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErpWriteResult {
    pub success: bool,
    pub message: Option<String>,
}

/// Customer, order and technician data source.
#[async_trait]
pub trait ErpClient: Send + Sync {
    async fn find_customer_by_cpf(&self, cpf: &str) -> anyhow::Result<Option<Customer>>;

    async fn orders_for_customer(&self, client_id: ClientId) -> anyhow::Result<Vec<ServiceOrder>>;

    async fn order(&self, order_id: OrderId) -> anyhow::Result<Option<ServiceOrder>>;

    /// Orders in `Scheduled` status held by any of `technicians` within `[from, to]`.
    async fn scheduled_orders(
        &self,
        technicians: &BTreeSet<TechnicianId>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<ServiceOrder>>;

    async fn commit_schedule(&self, commit: &ScheduleCommit) -> anyhow::Result<ErpWriteResult>;
}
