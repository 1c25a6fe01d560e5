pub mod postgres_db;

pub use postgres_db::migrator;
pub use postgres_db::operators;
pub use postgres_db::orders;
pub use postgres_db::pool::{PgPool, PooledConnection};
pub use postgres_db::transactions;
