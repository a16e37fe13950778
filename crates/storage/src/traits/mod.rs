mod squeaks;
pub use squeaks::SqueakStorage;

mod offers;
pub use offers::OfferStorage;

mod payments;
pub use payments::PaymentStorage;

mod profiles;
pub use profiles::ProfileStorage;

mod peers;
pub use peers::PeerStorage;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("profile name already exists: {0}")]
    ProfileNameExists(String),
    #[error("unsupported connection string: {0}")]
    UnsupportedConnectionString(String),
    #[error("storage error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}
