//! nexload-io: NeXus event-bank reading and concurrent loading.
//!
//! This crate reads `NXevent_data` banks from HDF5 event files and
//! drives the per-bank load tasks that fill an event workspace.
//!

mod bank;
mod compressed;
mod error;
mod loader;
pub mod nexus;
mod process;

pub use bank::{ProcessOptions, RawEventBank};
pub use compressed::process_bank_compressed;
pub use error::{Error, Result};
pub use loader::{ChunkSelection, EventLoader, LoadConfig, LoadSummary};
pub use nexus::{
    discover_banks, open_entry, tof_unit_scale, write_event_file, BankInfo, SyntheticBank,
};
pub use process::process_bank_data;
