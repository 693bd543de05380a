pub mod formatting;
pub mod logging;

pub use self::formatting::apply_pattern_string;
