use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Installation,
    #[default]
    Maintenance,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Installation => "installation",
            ServiceCategory::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "installation" => ServiceCategory::Installation,
            _ => ServiceCategory::Maintenance,
        }
    }
}

/// How the allocator picks the primary among valid candidates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    #[default]
    Soonest,
    MidWindow,
    LatestInWindow,
}

impl PriorityClass {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => PriorityClass::MidWindow,
            2 => PriorityClass::LatestInWindow,
            _ => PriorityClass::Soonest,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            PriorityClass::Soonest => 0,
            PriorityClass::MidWindow => 1,
            PriorityClass::LatestInWindow => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulingPolicy {
    pub subject_code: u32,
    pub min_lead_days: u32,
    pub max_lead_days: u32,
    pub priority: PriorityClass,
    pub category: ServiceCategory,
}

impl SchedulingPolicy {
    pub const DEFAULT_SUBJECT: u32 = 0;

    pub fn default_policy() -> Self {
        Self {
            subject_code: Self::DEFAULT_SUBJECT,
            min_lead_days: 1,
            max_lead_days: 15,
            priority: PriorityClass::Soonest,
            category: ServiceCategory::Maintenance,
        }
    }
}
