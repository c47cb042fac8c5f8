//! Bucket teardown: empty it, then delete it
//!
//! Absence is success at every step, so removing a bucket that is already
//! gone (or half gone) completes without error.

use crate::client::ClientFactory;
use crate::error::{Error, Result};
use crate::provider::StorageApi;
use crate::reconcile::Reconciler;
use crate::retry::cancellable;
use crate::state::{BucketIdentity, BucketState};
use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

/// Delete every object in `bucket`, page by page.
///
/// Keys within a page are deleted concurrently (at most `concurrency` in
/// flight); the first failure aborts the teardown. Returns the number of
/// keys deleted.
pub async fn clear_bucket<H: StorageApi>(
    data: &H,
    bucket: &str,
    cancel: &CancellationToken,
    concurrency: usize,
) -> Result<usize> {
    let mut continuation = None;
    let mut deleted = 0;

    loop {
        let listing = data.list_objects(bucket, continuation.take());
        let page = match cancellable(cancel, listing).await? {
            Ok(page) => page,
            Err(err) if err.is_not_found() => {
                tracing::debug!("Bucket {} is already gone.", bucket);
                return Ok(deleted);
            }
            Err(err) => return Err(err.into()),
        };

        let count = page.keys.len();
        let deletes = stream::iter(page.keys.iter())
            .map(|key| async move {
                match data.delete_object(bucket, key).await {
                    Err(err) if !err.is_not_found() => Err(Error::Provider(err)),
                    _ => Ok(()),
                }
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect::<Vec<()>>();
        cancellable(cancel, deletes).await??;

        deleted += count;
        tracing::debug!("Deleted {} objects from {} so far.", deleted, bucket);

        match page.next {
            Some(token) => continuation = Some(token),
            None => return Ok(deleted),
        }
    }
}

/// Delete an (empty) bucket; a missing bucket counts as deleted
pub async fn delete_bucket<H: StorageApi>(
    control: &H,
    bucket: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    match cancellable(cancel, control.delete_bucket(bucket)).await? {
        Err(err) if err.is_not_found() => {
            tracing::debug!("Bucket {} was already deleted.", bucket);
            Ok(())
        }
        other => Ok(other?),
    }
}

impl<F: ClientFactory> Reconciler<F> {
    /// Tear down the persisted bucket.
    ///
    /// Returns the identity that was removed, or `None` when the state holds
    /// no bucket. The caller clears its persisted state on success.
    pub async fn remove(&self, state: &BucketState) -> Result<Option<BucketIdentity>> {
        let Some(identity) = state.identity() else {
            tracing::info!("Aborting removal. Bucket name not found in state.");
            return Ok(None);
        };

        self.teardown(&identity).await?;

        tracing::info!(
            "Bucket {} was successfully deleted from region {}.",
            identity.name,
            identity.region
        );

        Ok(Some(identity))
    }

    pub(crate) async fn teardown(&self, identity: &BucketIdentity) -> Result<()> {
        let clients = self.factory.connect(&identity.region);

        tracing::info!("Clearing bucket {} contents.", identity.name);
        let deleted = clear_bucket(
            clients.select(identity.accelerated),
            &identity.name,
            &self.cancel,
            self.concurrency,
        )
        .await?;
        tracing::debug!("Removed {} objects from {}.", deleted, identity.name);

        tracing::info!(
            "Deleting bucket {} from region {}.",
            identity.name,
            identity.region
        );
        delete_bucket(clients.control(), &identity.name, &self.cancel).await
    }
}
