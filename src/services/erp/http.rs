use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use super::normalize::{customer_from_value, orders_from_body, records};
use super::{Customer, ErpClient, ErpWriteResult};
use crate::models::{ClientId, OrderId, OrderStatus, ScheduleCommit, ServiceOrder, TechnicianId};

/// REST client for the provider's ERP.
pub struct HttpErpClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpErpClient {
    pub fn new(base_url: String, token: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ERP HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to call ERP {path}"))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        let data: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse ERP response for {path}"))?;
        if !status.is_success() {
            anyhow::bail!("ERP error ({}) on {}: {}", status, path, data);
        }
        Ok(data)
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
    async fn find_customer_by_cpf(&self, cpf: &str) -> anyhow::Result<Option<Customer>> {
        let body = self.get("/customers", &[("cpf", cpf.to_string())]).await?;
        match records(&body).first() {
            Some(record) => Ok(Some(customer_from_value(record)?)),
            None => Ok(None),
        }
    }

    async fn orders_for_customer(&self, client_id: ClientId) -> anyhow::Result<Vec<ServiceOrder>> {
        let body = self
            .get(&format!("/customers/{client_id}/orders"), &[])
            .await?;
        Ok(orders_from_body(&body))
    }

    async fn order(&self, order_id: OrderId) -> anyhow::Result<Option<ServiceOrder>> {
        let body = self.get(&format!("/orders/{order_id}"), &[]).await?;
        Ok(orders_from_body(&body).into_iter().next())
    }

    async fn scheduled_orders(
        &self,
        technicians: &BTreeSet<TechnicianId>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<ServiceOrder>> {
        if technicians.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = technicians.iter().map(|t| t.to_string()).collect();
        let body = self
            .get(
                "/orders",
                &[
                    ("status", OrderStatus::Scheduled.as_str().to_string()),
                    ("technicians", ids.join(",")),
                    ("from", from.format("%Y-%m-%d").to_string()),
                    ("to", to.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;
        Ok(orders_from_body(&body))
    }

    async fn commit_schedule(&self, commit: &ScheduleCommit) -> anyhow::Result<ErpWriteResult> {
        let body = json!({
            "technician_id": commit.technician_id(),
            "sector_id": commit.sector_id(),
            "date": commit.date().format("%Y-%m-%d").to_string(),
            "period": commit.period().code(),
            "status": OrderStatus::Scheduled.as_str(),
        });

        let resp = self
            .client
            .put(format!("{}/orders/{}/schedule", self.base_url, commit.order_id()))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("failed to call ERP schedule endpoint")?;

        let status = resp.status();
        let data: Value = resp.json().await.unwrap_or(Value::Null);
        let message = data
            .get("message")
            .or_else(|| data.get("mensagem"))
            .and_then(|m| m.as_str())
            .map(str::to_string);

        if status.is_server_error() {
            anyhow::bail!("ERP error ({}) committing order {}: {}", status, commit.order_id(), data);
        }

        // 4xx is a business rejection, reported back to the user
        let success = status.is_success()
            && data
                .get("success")
                .and_then(|s| s.as_bool())
                .unwrap_or(true);

        Ok(ErpWriteResult { success, message })
    }
}
