mod dates;
mod validator;

pub use dates::{canonical, coerce_column, coerce_value, normalize_dates, parse_instant, DateCoercion};
pub use validator::validate_schema;
