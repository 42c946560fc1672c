use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::intent::Intent;
use super::order::{ClientId, Period, ServiceOrder};
use super::slot::SlotCandidate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerIdentity {
    pub cpf: String,
    pub client_id: ClientId,
    pub name: String,
}

impl CustomerIdentity {
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

/// Conversation state of one phone number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub phone: String,
    pub intent: Option<Intent>,
    pub previous_intent: Option<Intent>,
    pub customer: Option<CustomerIdentity>,
    #[serde(default)]
    pub orders: Vec<ServiceOrder>,
    pub chosen_order: Option<ServiceOrder>,
    pub pending_date: Option<NaiveDate>,
    pub pending_period: Option<Period>,
    #[serde(default)]
    pub offered_slots: Vec<SlotCandidate>,
    #[serde(default)]
    pub awaiting_confirmation: bool,
    pub last_activity: NaiveDateTime,
}

impl Session {
    pub fn new(phone: &str, now: NaiveDateTime) -> Self {
        Self {
            phone: phone.to_string(),
            intent: None,
            previous_intent: None,
            customer: None,
            orders: Vec::new(),
            chosen_order: None,
            pending_date: None,
            pending_period: None,
            offered_slots: Vec::new(),
            awaiting_confirmation: false,
            last_activity: now,
        }
    }

    pub fn record_intent(&mut self, intent: Intent) {
        self.previous_intent = self.intent.replace(intent);
    }

    /// Keeps phone and customer identity, drops everything else.
    pub fn reset_to_identity(&mut self) {
        *self = Self {
            customer: self.customer.take(),
            ..Self::new(&self.phone, self.last_activity)
        };
    }

    /// Drops the date/period negotiation but keeps the chosen order.
    pub fn clear_negotiation(&mut self) {
        self.pending_date = None;
        self.pending_period = None;
        self.offered_slots.clear();
        self.awaiting_confirmation = false;
    }

    pub fn clear_order(&mut self) {
        self.chosen_order = None;
        self.clear_negotiation();
    }

    /// Compact state description handed to the intent classifier.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        match &self.customer {
            Some(c) => parts.push(format!("customer identified: {}", c.first_name())),
            None => parts.push("customer not identified (CPF unknown)".to_string()),
        }
        if !self.orders.is_empty() {
            let ids: Vec<String> = self.orders.iter().map(|o| o.id.to_string()).collect();
            parts.push(format!("orders listed: {}", ids.join(", ")));
        }
        if let Some(order) = &self.chosen_order {
            parts.push(format!("chosen order: {}", order.id));
        }
        if let Some(date) = self.pending_date {
            parts.push(format!("pending date: {}", date.format("%Y-%m-%d")));
        }
        if let Some(period) = self.pending_period {
            parts.push(format!("pending period: {}", period.as_str()));
        }
        if !self.offered_slots.is_empty() {
            parts.push(format!("slots offered: {}", self.offered_slots.len()));
        }
        if self.awaiting_confirmation {
            parts.push("awaiting confirmation of the proposed visit".to_string());
        }
        if let Some(intent) = self.intent {
            parts.push(format!("last intent: {}", intent.as_str()));
        }
        parts.join("; ")
    }
}
