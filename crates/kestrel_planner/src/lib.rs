pub mod admin;
pub mod plan;

pub use admin::{parse_admin_statement, AdminStatement, GUIDEPOST_WIDTH_ATTR};
pub use plan::*;
