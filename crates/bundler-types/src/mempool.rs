use alloy_primitives::{Address, B256, U256};

use crate::user_operation::UserOperation;

/// Fingerprint of every contract address touched during validation, used to
/// detect code changes on re-validation.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct ReferencedContracts {
    pub addresses: Vec<Address>,
    pub hash: B256,
}

/// A user operation held in the mempool, keyed for replacement by
/// `(sender, nonce)` and for removal by `user_op_hash`.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub user_op: UserOperation,
    pub user_op_hash: B256,
    pub prefund: U256,
    pub referenced_contracts: ReferencedContracts,
    pub aggregator: Option<Address>,
}

impl MempoolEntry {
    pub fn key(&self) -> (Address, U256) {
        (self.user_op.sender, self.user_op.nonce)
    }
}
