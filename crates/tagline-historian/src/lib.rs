pub mod config;
pub mod historian;
pub mod record;
pub mod registrar;
pub mod store;

pub use config::{ConfigError, HistorianConfig};
pub use historian::{HistorianError, TagGroupHistorian};
pub use record::{MutationRecord, RecordError};
pub use registrar::{pending_key, Registrar, RegistrarError, StoredRegistrar, UploadListener};
pub use store::{RecordStore, RECORDS_KEY};
