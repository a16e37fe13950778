use async_trait::async_trait;
use sqk_types::Profile;

use crate::StorageResult;

/// Profile persistence. Names are unique; inserting a duplicate name fails
/// with [`crate::StorageError::ProfileNameExists`].
#[async_trait]
pub trait ProfileStorage {
    /// Insert a profile and return its assigned id.
    async fn insert_profile(&self, profile: &Profile) -> StorageResult<u64>;

    async fn get_profile(&self, profile_id: u64) -> StorageResult<Option<Profile>>;

    async fn get_profile_by_name(&self, name: &str) -> StorageResult<Option<Profile>>;

    async fn get_profile_by_address(&self, address: &str) -> StorageResult<Option<Profile>>;

    async fn get_profiles(&self) -> StorageResult<Vec<Profile>>;

    async fn get_signing_profiles(&self) -> StorageResult<Vec<Profile>>;

    async fn get_contact_profiles(&self) -> StorageResult<Vec<Profile>>;

    /// Addresses of all profiles currently followed.
    async fn get_followed_addresses(&self) -> StorageResult<Vec<String>>;

    async fn set_profile_following(&self, profile_id: u64, following: bool) -> StorageResult<()>;

    async fn set_profile_use_custom_price(
        &self,
        profile_id: u64,
        use_custom_price: bool,
    ) -> StorageResult<()>;

    async fn set_profile_custom_price(
        &self,
        profile_id: u64,
        price_msat: u64,
    ) -> StorageResult<()>;

    async fn rename_profile(&self, profile_id: u64, name: &str) -> StorageResult<()>;

    async fn set_profile_image(
        &self,
        profile_id: u64,
        image: Option<Vec<u8>>,
    ) -> StorageResult<()>;

    async fn delete_profile(&self, profile_id: u64) -> StorageResult<()>;
}
