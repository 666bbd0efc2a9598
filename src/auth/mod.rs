//! Cookie and client-IP helpers shared by the auth HTTP surface.

mod cookie;
mod ip;

pub use cookie::{REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
pub use ip::{IpExtractor, extract_client_ip};
