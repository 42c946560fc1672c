//! Turns loosely-shaped ERP records into the crate's types.
//!
//! The ERP names the same field differently depending on the endpoint
//! (`setor`, `setor_id`, `sector`, ...), so every lookup goes through an alias list
//! and this is the only place that knows about it.

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::Customer;
use crate::models::{OrderStatus, Period, ServiceOrder};

const ID: &[&str] = &["id", "id_os", "os_id", "order_id"];
const CLIENT: &[&str] = &["client_id", "id_cliente", "cliente_id", "customer_id"];
const SECTOR: &[&str] = &["sector_id", "setor_id", "id_setor", "setor", "sector"];
const SUBJECT: &[&str] = &["subject_code", "id_assunto", "assunto", "subject"];
const STATUS: &[&str] = &["status", "situacao"];
const CREATED: &[&str] = &["created_at", "data_abertura", "abertura", "opened_at"];
const TECHNICIAN: &[&str] = &["technician_id", "id_tecnico", "tecnico", "technician"];
const SCHEDULED_DATE: &[&str] = &["scheduled_date", "data_agenda", "data_agendamento"];
const SCHEDULED_PERIOD: &[&str] = &["scheduled_period", "melhor_horario_agenda", "periodo"];
const PREFERRED_PERIOD: &[&str] = &["preferred_period", "melhor_horario_reserva"];
const DESCRIPTION: &[&str] = &["description", "mensagem", "assunto_descricao"];
const NAME: &[&str] = &["name", "nome", "razao"];
const CPF: &[&str] = &["cpf", "cnpj_cpf", "documento"];

/// First non-empty value among `keys`.
fn field<'a>(record: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| record.get(*k)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Zero ids mean "unset" on the ERP side.
fn opt_id(record: &Value, keys: &[&str]) -> Option<u64> {
    field(record, keys).and_then(as_u64).filter(|id| *id != 0)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%d/%m/%Y"))
        .ok()
}

pub fn order_from_value(record: &Value) -> anyhow::Result<ServiceOrder> {
    let id = field(record, ID)
        .and_then(as_u64)
        .context("order record without id")?;
    let status_raw = field(record, STATUS)
        .and_then(as_text)
        .with_context(|| format!("order {id} without status"))?;
    let status = OrderStatus::parse(&status_raw)
        .with_context(|| format!("order {id} has unknown status {status_raw:?}"))?;
    let created_at = field(record, CREATED)
        .and_then(as_text)
        .and_then(|s| parse_datetime(&s))
        .with_context(|| format!("order {id} without a valid creation timestamp"))?;

    Ok(ServiceOrder {
        id,
        client_id: field(record, CLIENT).and_then(as_u64).unwrap_or_default(),
        sector_id: field(record, SECTOR).and_then(as_u64).unwrap_or_default(),
        subject_code: field(record, SUBJECT)
            .and_then(as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or_default(),
        status,
        created_at,
        technician_id: opt_id(record, TECHNICIAN),
        scheduled_date: field(record, SCHEDULED_DATE)
            .and_then(as_text)
            .and_then(|s| parse_date(&s)),
        scheduled_period: field(record, SCHEDULED_PERIOD)
            .and_then(as_text)
            .and_then(|s| Period::from_code(&s)),
        preferred_period: field(record, PREFERRED_PERIOD)
            .and_then(as_text)
            .and_then(|s| Period::from_code(&s)),
        description: field(record, DESCRIPTION).and_then(as_text),
    })
}

pub fn customer_from_value(record: &Value) -> anyhow::Result<Customer> {
    let id = field(record, &["id", "id_cliente", "client_id"])
        .and_then(as_u64)
        .context("customer record without id")?;
    Ok(Customer {
        id,
        name: field(record, NAME).and_then(as_text).unwrap_or_default(),
        cpf: field(record, CPF)
            .and_then(as_text)
            .map(|s| s.chars().filter(char::is_ascii_digit).collect())
            .unwrap_or_default(),
    })
}

/// The record list of a response: a bare array, a wrapped array, or a single object.
pub fn records(body: &Value) -> Vec<&Value> {
    match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            for key in ["registros", "data", "items", "orders", "customers"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().collect();
                }
            }
            if map.is_empty() {
                Vec::new()
            } else {
                vec![body]
            }
        }
        _ => Vec::new(),
    }
}

/// Normalizes every order in `body`, skipping (and logging) malformed records.
pub fn orders_from_body(body: &Value) -> Vec<ServiceOrder> {
    records(body)
        .into_iter()
        .filter_map(|record| match order_from_value(record) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed ERP order record");
                None
            }
        })
        .collect()
}
