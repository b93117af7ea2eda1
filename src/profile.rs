use crate::backend::PollBackend;
use crate::catalog::{CatalogError, PollCatalog};
use crate::clock::Clock;
use crate::identity::IdentityState;
use crate::ledger::{LedgerError, LedgerStore, VoteLedger};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfileStats {
    pub votes_cast: usize,
    pub polls_created: usize,
    /// Rewards are not implemented; always zero.
    pub rewards_earned: u64,
}

impl ProfileStats {
    pub async fn gather<B, S, C>(
        identity: &IdentityState,
        ledger: &VoteLedger<S>,
        catalog: &PollCatalog<B, C>,
    ) -> Result<ProfileStats, ProfileError>
    where
        B: PollBackend,
        S: LedgerStore,
        C: Clock,
    {
        let address = identity
            .address
            .as_ref()
            .ok_or(ProfileError::IdentityUnavailable)?;

        Ok(ProfileStats {
            votes_cast: ledger.votes_cast(address)?,
            polls_created: catalog.created_by(address).await?,
            rewards_earned: 0,
        })
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Connect a wallet to see profile stats")]
    IdentityUnavailable,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
