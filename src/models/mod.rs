pub mod bill;
pub mod draft;
pub mod month;
pub mod reading;
pub mod result;
pub mod room;

pub use bill::{BillRow, PaymentStatus, PersistedBill};
pub use draft::{BillField, BillForm, FormMeter, FormReadings, RoomBillDraft};
pub use month::{BillingMonth, ParseMonthError};
pub use reading::{BillInput, BillReadings, BillResult, MeterReading, MeterType};
pub use result::{BatchResult, BulkBillEntry, CommitOutcome, SingleBillRequest};
pub use room::{Room, RoomBillRow, RoomFilter, RoomSummary};
