//! Types the storefront keeps between requests.

mod notice;
mod session;

pub use notice::{Notice, NoticeLevel};
pub use session::{CurrentUser, session_keys};
