//! HTTP layer. Each submodule exposes a `routes()` function; everything is
//! mounted under `/api/v1` by [`crate::api_v1_routes`].

use serde::Deserialize;
use utoipa::IntoParams;

pub mod auth;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod products;
pub mod reports;
pub mod users;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Common pagination query parameters.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PageParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PageParams {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_clamp_to_sane_bounds() {
        let p = PageParams {
            page: Some(0),
            per_page: Some(10_000),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), MAX_PAGE_SIZE);

        let p = PageParams::default();
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), DEFAULT_PAGE_SIZE);
    }
}
