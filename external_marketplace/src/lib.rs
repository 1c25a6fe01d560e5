pub mod client;
pub mod dto;
pub mod rest_client;

pub use client::{HttpMarketplaceClient, Marketplace};
#[cfg(any(test, feature = "mock"))]
pub use client::MockMarketplace;
