pub mod connection;
pub mod schema;

pub use connection::{release, Gateway};
pub use schema::{build_create_provider_table, provider_table_name, select_rows_where, table_columns, TableColumn};
