//! Venue capability interface for the binmm core.
//!
//! Everything the safety core needs from the exchange goes through the
//! [`Venue`] trait:
//! - Order book tops, order placement and cancellation
//! - Open orders, trade history, authoritative positions, cash balance
//!
//! Implementations:
//! - `HttpVenue`: REST adapter (public book, data API, signing order gateway)
//! - `SimVenue`: simulated account for dry-run and paper modes
//! - `MockVenue`: scripted responses and call recording for tests

pub mod error;
pub mod http;
pub mod mock;
pub mod sim;
pub mod types;
pub mod venue;

pub use error::{VenueError, VenueResult};
pub use http::{HttpVenue, HttpVenueConfig};
pub use mock::{MockCall, MockVenue};
pub use sim::SimVenue;
pub use types::{OpenOrder, RawTrade, VenuePosition};
pub use venue::{BoxFuture, DynVenue, Venue};
