pub mod ai;
pub mod allocator;
pub mod booking;
pub mod calendar;
pub mod conversation;
pub mod directory;
pub mod erp;
pub mod messaging;
pub mod policy;
pub mod scheduling;
pub mod session_store;
