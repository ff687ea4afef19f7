/// Transport adapters
///
/// Both adapters present the same thing to the core: an authenticated user,
/// an inbound byte channel and an `Outbound` writer. Everything above the
/// byte stream (line discipline, rendering) is shared, so SSH and the web
/// terminal behave identically.

pub mod ssh;
pub mod web;
