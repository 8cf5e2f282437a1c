//! Importer - Feed import and transformation pipeline
//!
//! Responsibilities:
//! - Resolve country names / ISO3 codes to ISO2 join keys
//! - Parse narrow CSV feeds, normalize dates, append derived columns
//! - Derive per-country totals and deaths deltas
//! - Merge wide (column-per-date) series into existing rows
//! - Stage every table in a shadow copy and swap it in
//!
//! Entry point: [`Importer::run_import`].

pub mod config;
pub mod countries;
pub mod delta;
pub mod error;
pub mod lookup;
pub mod normalize;
pub mod run;
pub mod schema;
pub mod store;
pub mod wide;

pub use config::Config;
pub use error::{ImportError, Result};
pub use lookup::{CountryLookup, CountryLookupEntry};
pub use normalize::{map_date, FeedReport};
pub use run::{Importer, RunReport, Stage, StageOutcome};
pub use schema::{TableSchema, Value};
pub use store::{PgStore, StoreError, TableStore};
