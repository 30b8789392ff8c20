pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{cell, empty, error, header, ident, status, success, summary_row, warn};
pub use table::{result_table, schema_table, FieldRow};
pub use theme::{theme, Theme};
