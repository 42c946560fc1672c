pub mod commit;
pub mod intent;
pub mod order;
pub mod policy;
pub mod sector;
pub mod session;
pub mod slot;

pub use commit::{CommitError, ScheduleCommit};
pub use intent::Intent;
pub use order::{ClientId, OrderId, OrderStatus, Period, SectorId, ServiceOrder, TechnicianId};
pub use policy::{PriorityClass, SchedulingPolicy, ServiceCategory};
pub use sector::{PeriodCaps, PeriodLoad, Sector, SectorKind};
pub use session::{CustomerIdentity, Session};
pub use slot::{Booking, SlotCandidate, SlotConstraints, Suggestion};
