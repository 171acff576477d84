//! Wire and internal domain types shared by the bundler core and its RPC
//! surface: the canonical [`UserOperation`](user_operation::UserOperation)
//! record, mempool/reputation/storage records, and the typed tracer output.

pub mod hex;
pub mod mempool;
pub mod reputation;
pub mod storage;
pub mod tracer;
pub mod user_operation;

pub use mempool::{MempoolEntry, ReferencedContracts};
pub use reputation::{ReputationEntry, ReputationStatus, StakeInfo};
pub use storage::{AccountStorage, ConditionalOptions, StorageMap};
pub use tracer::{AddressAccess, CallFrame, ContractSizeInfo, TracerResult};
pub use user_operation::{Entity, PackedUserOperation, UserOperation, ValidTimeRange};
