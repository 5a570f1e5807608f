//! Tallied - a markup event-stream interpreter for ledgers and chronologies
//! ---
//!
//! Tallied consumes a flat, ordered stream of nested markup events (as
//! produced by XML/CSV/calendar decoders) and interprets the embedded
//! commands into either a validated, date-ordered general ledger or a
//! day-indexed chronology. Decoders, renderers and the HTTP adapter all
//! speak the same [`Event`][event::Event] vocabulary and stay outside
//! this crate.
//!

extern crate pest;
#[macro_use]
extern crate pest_derive;

/// The event vocabulary shared by every pipeline stage.
pub mod event;

/// Event sources/sinks and the capture engine: buffering a bounded
/// nested subtree of the stream, with strict structural depth tracking,
/// for synchronous inspection by a command handler.
pub mod capture;

/// Command dispatch: maps prefixed `start` tags to handlers on the
/// active processor, forwards everything else unchanged.
pub mod processor;

/// The `{field|filter}` template mini-language and the match expressions
/// used by sheet replacement rules.
pub mod template;

/// Accounts: hierarchical `/`-separated paths, unique numbers, aggregate
/// resolution and the hierarchical listing.
pub mod account;

/// Sheet metadata: posting specs, replacement rules, join declarations.
pub mod sheet;

mod entry;

/// The ledger builder: `accounting:` commands, sealing, and the query
/// surface over sealed entries.
pub mod accounting;

/// The chronology builder: `chrono:` commands, day materialization and
/// calendar helpers.
pub mod chronology;

mod error;

pub use accounting::{Accounting, AccountStats, PeriodBucket, PeriodicStats, SUSPENSE_ACCOUNT};
pub use capture::{ArraySource, Capture, EventSink, EventSource, VecSink};
pub use chronology::{Chronology, Day};
pub use entry::{AccountEntry, Entry, BALANCE_EPSILON};
pub use error::LedgerError;
pub use event::{Attrs, Event, Level};
pub use processor::{process, Processor};
