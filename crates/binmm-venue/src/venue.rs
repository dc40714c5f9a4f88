//! The venue capability trait.
//!
//! Provides a dyn-compatible abstraction over the exchange, allowing for:
//! - Dependency injection for testing
//! - Simulated accounts in dry-run and paper modes
//! - Keeping signing and transport outside the safety core

use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;

use binmm_core::{BookTop, InstrumentId, OrderId, PostOrderRequest, PostOrderResult};

use crate::error::VenueResult;
use crate::types::{OpenOrder, RawTrade, VenuePosition};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Exchange operations consumed by the safety core.
///
/// Implementations must bound every call with a timeout; a call that cannot
/// complete returns an error rather than hanging the control loop.
pub trait Venue: Send + Sync {
    /// Best bid/ask for one instrument.
    fn get_order_book<'a>(&'a self, instrument: &'a InstrumentId)
        -> BoxFuture<'a, VenueResult<BookTop>>;

    /// Submit a limit order.
    ///
    /// Business rejections (post-only cross, insufficient balance) come back
    /// as `Ok` with `success == false`; `Err` means the call itself failed.
    fn post_order<'a>(
        &'a self,
        request: &'a PostOrderRequest,
    ) -> BoxFuture<'a, VenueResult<PostOrderResult>>;

    /// Cancel one order. `Ok(true)` only when the venue confirmed it.
    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, VenueResult<bool>>;

    /// Cancel every order on the account.
    fn cancel_all(&self) -> BoxFuture<'_, VenueResult<bool>>;

    /// Orders currently resting on the venue.
    fn get_open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>>;

    /// Most recent trades for the account, newest first.
    fn get_trades<'a>(
        &'a self,
        account: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, VenueResult<Vec<RawTrade>>>;

    /// Authoritative holdings for the account.
    fn get_positions<'a>(&'a self, account: &'a str)
        -> BoxFuture<'a, VenueResult<Vec<VenuePosition>>>;

    /// Cash (USDC) balance for the account.
    fn get_balance<'a>(&'a self, account: &'a str) -> BoxFuture<'a, VenueResult<Decimal>>;
}

/// Arc wrapper for Venue trait objects.
pub type DynVenue = Arc<dyn Venue>;
