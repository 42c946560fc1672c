use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Start,
    IdentityExtracted,
    ListOrders,
    OrderStatus,
    SelectOrder,
    ListAvailableSlots,
    ExtractDate,
    ExtractPeriod,
    RequestSchedule,
    Reschedule,
    ConfirmSchedule,
    ChangeOrder,
    Cancel,
    Unrelated,
    Finished,
}

impl Intent {
    pub const ALL: [Intent; 15] = [
        Intent::Start,
        Intent::IdentityExtracted,
        Intent::ListOrders,
        Intent::OrderStatus,
        Intent::SelectOrder,
        Intent::ListAvailableSlots,
        Intent::ExtractDate,
        Intent::ExtractPeriod,
        Intent::RequestSchedule,
        Intent::Reschedule,
        Intent::ConfirmSchedule,
        Intent::ChangeOrder,
        Intent::Cancel,
        Intent::Unrelated,
        Intent::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::IdentityExtracted => "identity_extracted",
            Intent::ListOrders => "list_orders",
            Intent::OrderStatus => "order_status",
            Intent::SelectOrder => "select_order",
            Intent::ListAvailableSlots => "list_available_slots",
            Intent::ExtractDate => "extract_date",
            Intent::ExtractPeriod => "extract_period",
            Intent::RequestSchedule => "request_schedule",
            Intent::Reschedule => "reschedule",
            Intent::ConfirmSchedule => "confirm_schedule",
            Intent::ChangeOrder => "change_order",
            Intent::Cancel => "cancel",
            Intent::Unrelated => "unrelated",
            Intent::Finished => "finished",
        }
    }

    /// Lenient parse of a model-produced code; hyphens and case are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().trim_matches('"').to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == normalized)
    }
}
