//! Lot Ledger
//!
//! Converts a time-ordered transaction history into open cost-basis lots
//! per position, with strict FIFO consumption and per-lot realized
//! gain/loss fragments for downstream wash-sale matching.

pub mod ledger;

pub use ledger::{LedgerBook, LedgerConfig, Lot, LotLedger, RealizedDisposal};
