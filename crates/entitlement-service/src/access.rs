//! Access lookups for content pages
//!
//! Read-only: no locks, no writes. A buyer only ever sees their own record.

use std::sync::Arc;
use unlock_common::{
    access_status, AccessStatus, Actor, EntitlementKey, EntitlementRecord, EntitlementStatus,
    Error, Item, Result,
};

use crate::directory::Catalog;
use crate::models::AccessView;
use crate::storage::EntitlementStore;

pub struct AccessService {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<dyn Catalog>,
}

impl AccessService {
    pub fn new(store: Arc<dyn EntitlementStore>, catalog: Arc<dyn Catalog>) -> Self {
        Self { store, catalog }
    }

    async fn load_item(&self, item_type: &str, item_id: &str) -> Result<Item> {
        self.catalog
            .get_item(item_type, item_id)
            .await?
            .ok_or_else(|| Error::ItemNotFound {
                item_type: item_type.to_string(),
                item_id: item_id.to_string(),
            })
    }

    async fn load_record(&self, item: &Item, user_id: &str) -> Result<Option<EntitlementRecord>> {
        // Free items never consult the store
        if item.is_free() {
            return Ok(None);
        }
        let key = EntitlementKey::new(user_id, item.id.clone(), item.item_type.clone());
        Ok(self.store.find_by_key(&key).await?)
    }

    /// Derived access status for a user and item
    pub async fn get_access_status(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: &str,
    ) -> Result<AccessStatus> {
        let item = self.load_item(item_type, item_id).await?;
        let record = self.load_record(&item, user_id).await?;
        Ok(access_status(&item, record.as_ref()))
    }

    /// Everything a content page needs to render the item for `actor`
    pub async fn view(&self, actor: &Actor, item_type: &str, item_id: &str) -> Result<AccessView> {
        let item = self.load_item(item_type, item_id).await?;
        let record = self.load_record(&item, &actor.user_id).await?;
        let status = access_status(&item, record.as_ref());

        let rejection_note = record
            .filter(|r| r.status == EntitlementStatus::Rejected)
            .and_then(|r| r.metadata.notes);

        Ok(AccessView {
            asset_url: item.asset_url.filter(|_| status.grants_asset()),
            item_id: item.id,
            item_type: item.item_type,
            title: item.title,
            price: item.price,
            status,
            rejection_note,
        })
    }

    /// The caller's own record for an item
    pub async fn own_entitlement(
        &self,
        actor: &Actor,
        item_type: &str,
        item_id: &str,
    ) -> Result<EntitlementRecord> {
        let key = EntitlementKey::new(actor.user_id.clone(), item_id, item_type);
        self.store
            .find_by_key(&key)
            .await?
            .ok_or_else(|| Error::RecordNotFound(key.to_string()))
    }
}
