//! Types related to [`StoreConfig`] and [`SecureCookieConfig`].
mod codec;
mod options;
mod store;

pub(crate) use codec::default_max_age as default_cookie_max_age;
pub use codec::{CookieKeyConfig, SecureCookieConfig};
pub use options::SessionOptions;
pub use store::StoreConfig;
