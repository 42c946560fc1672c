use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub type OrderId = u64;
pub type SectorId = u64;
pub type TechnicianId = u64;
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Morning,
    Afternoon,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Morning, Period::Afternoon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
        }
    }

    /// ERP wire code: `M` for morning, `T` (tarde) for afternoon.
    pub fn code(&self) -> &'static str {
        match self {
            Period::Morning => "M",
            Period::Afternoon => "T",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "m" | "manha" | "manhã" | "morning" => Some(Period::Morning),
            "t" | "tarde" | "afternoon" => Some(Period::Afternoon),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Morning => "manhã",
            Period::Afternoon => "tarde",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Scheduled,
    EnRoute,
    InProgress,
    Finished,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Scheduled => "scheduled",
            OrderStatus::EnRoute => "en_route",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Finished => "finished",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Accepts both the ERP's short status codes and the snake_case names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "a" | "open" | "aberta" => Some(OrderStatus::Open),
            "ag" | "scheduled" | "agendada" => Some(OrderStatus::Scheduled),
            "ds" | "en_route" | "deslocamento" => Some(OrderStatus::EnRoute),
            "ex" | "in_progress" | "execucao" => Some(OrderStatus::InProgress),
            "f" | "finished" | "finalizada" => Some(OrderStatus::Finished),
            "c" | "cancelled" | "cancelada" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Open => "aberta",
            OrderStatus::Scheduled => "agendada",
            OrderStatus::EnRoute => "técnico a caminho",
            OrderStatus::InProgress => "em execução",
            OrderStatus::Finished => "finalizada",
            OrderStatus::Cancelled => "cancelada",
        }
    }

    /// Orders a customer may (re)schedule through the assistant.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::Scheduled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceOrder {
    pub id: OrderId,
    pub client_id: ClientId,
    pub sector_id: SectorId,
    pub subject_code: u32,
    pub status: OrderStatus,
    pub created_at: NaiveDateTime,
    pub technician_id: Option<TechnicianId>,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_period: Option<Period>,
    pub preferred_period: Option<Period>,
    pub description: Option<String>,
}

impl ServiceOrder {
    pub fn short_label(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("OS {} ({})", self.id, d),
            _ => format!("OS {}", self.id),
        }
    }
}
