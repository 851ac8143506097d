pub mod account_stream;
pub mod futures_venue;
pub mod rest;
pub mod signer;
pub mod spot_venue;

pub use futures_venue::FuturesVenueAdapter;
pub use spot_venue::SpotVenueAdapter;
