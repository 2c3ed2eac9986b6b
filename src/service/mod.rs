pub mod calculator;
pub mod memory_store;
pub mod pg_store;
pub mod session;
pub mod store;

pub use calculator::{normalize_reading, resolve_rate, BillCalculator};
pub use memory_store::MemoryBillStore;
pub use pg_store::PgBillStore;
pub use session::{
    BulkEditSession, CommitPolicy, DisplayedValues, LoadReport, PendingBatch, PendingSingle,
    RowState, RowStatus, SessionRow,
};
pub use store::{check_positive_consumption, BillStore, BillWriter, RateSettings, RoomQuery};
