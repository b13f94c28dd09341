use super::context::OpenScope;
use super::{StorageContext, StoreError, StoreResult};
use log::warn;

/// Transaction guard handed out by `StorageContext::transaction_context`.
///
/// A scope either owns the transaction it started or joins one that was
/// already active. Joined scopes never commit or roll back.
pub struct TransactionScope<'a> {
    storage: &'a StorageContext,
    owner: bool,
    finished: bool,
    // Dropped after `Drop::drop` runs, so rollback happens before close.
    connection: OpenScope<'a>,
}

impl<'a> TransactionScope<'a> {
    pub(crate) fn begin(storage: &'a StorageContext) -> StoreResult<Self> {
        let connection = storage.open_scope()?;
        let owner = !storage.transaction_exists();
        if owner {
            storage.begin_transaction()?;
        }
        Ok(Self {
            storage,
            owner,
            finished: false,
            connection,
        })
    }

    /// Whether this scope started the transaction.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// # Errors
    /// - `InvalidState` when the connection was force-closed since the
    ///   transaction began; its work was rolled back then.
    pub fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        if self.owner && !self.connection.is_current() {
            return Err(StoreError::InvalidState(
                "transaction was rolled back by a forced close".to_string(),
            ));
        }
        if self.owner {
            self.storage.commit_transaction()?;
        }
        Ok(())
    }

    pub fn rollback(mut self) -> StoreResult<()> {
        self.finished = true;
        if self.owner && self.connection.is_current() {
            self.storage.rollback_transaction()?;
        }
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        // A forced close already rolled this transaction back; whatever
        // is active now belongs to a later connection.
        if self.finished || !self.owner || !self.connection.is_current() {
            return;
        }
        if let Err(err) = self.storage.rollback_transaction() {
            warn!("event=transaction_rollback module=db status=error reason=scope_dropped error={err}");
        }
    }
}
