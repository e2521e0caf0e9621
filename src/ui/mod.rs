pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    banner, caution, document_detail, document_written, done, failure, field, heading, nothing,
    tag_list, timestamp, total,
};
pub use table::{documents_table, migrations_table, stats_table, TableBuilder};
pub use theme::{palette, Palette};
