pub mod text;
pub mod time;

pub use text::{fit_column, parse_args, parse_key_value};
pub use time::{format_duration_ms, format_epoch_ms, format_timestamp};
