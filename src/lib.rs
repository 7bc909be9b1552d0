//! Coding blocks with enforced breaks. A block starts with a stated intention, runs a coding
//! countdown while recording which applications get the user's input, then forces a break in
//! which every keystroke goes into a reflection log instead of the rest of the system.
//!

pub mod attribution;
pub mod capture;
pub mod cli;
pub mod event_source;
pub mod focus;
pub mod session;
pub mod storage;
pub mod utils;
