pub mod chunks;
pub mod connection;
pub mod documents;
pub mod external;
pub mod filter;
pub mod schema;
pub mod tenants;

pub use chunks::ChunkRecord;
pub use connection::{DbError, PostgresOptions, Result, Store};
pub use documents::{DocumentRecord, SearchHit};
pub use external::{ExternalChunkRecord, ExternalDocumentRecord};
pub use filter::TenantFilter;
pub use schema::{Collection, SCHEMA_NAME};
