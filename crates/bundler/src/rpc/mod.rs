//! JSON-RPC method table: binds every bundler method onto
//! `bundler-rpc`'s [`RpcHandler`] trait, translating `BundlerError` into
//! wire `RpcError`s. Structured the way `anvil-rpc`'s `EthApi` dispatches
//! its own `EthRequest` enum variants, one `match` arm per method.

pub mod wire;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use async_trait::async_trait;
use bundler_rpc::{RpcError, RpcHandler};
use bundler_types::hex::encode_u256;
use bundler_types::ReputationEntry;
use serde_json::{json, Value};

use crate::config::BundlingMode;
use crate::error::BundlerError;
use crate::execution::ExecutionManager;
use crate::provider::NodeProvider;
use crate::validation::calc_pre_verification_gas;

use wire::{parse_hash_param, parse_send_params, reputation_entries_to_value, UserOperationWire, WireError};

pub struct BundlerRpc<P> {
    exec: Arc<ExecutionManager<P>>,
    chain_id: u64,
    unsafe_mode: bool,
}

impl<P: NodeProvider + 'static> BundlerRpc<P> {
    pub fn new(exec: Arc<ExecutionManager<P>>, chain_id: u64, unsafe_mode: bool) -> Self {
        Self { exec, chain_id, unsafe_mode }
    }

    fn client_version(&self) -> String {
        let suffix = if self.unsafe_mode { "/unsafe" } else { "" };
        format!("aa-bundler/{}{suffix}", env!("CARGO_PKG_VERSION"))
    }

    fn now(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
    }

    async fn eth_send_user_operation(&self, params: Value) -> Result<Value, BundlerError> {
        let (op, entry_point) = parse_send_params(params).map_err(wire_err)?;
        let outcome = self.exec.send_user_operation(op, entry_point, self.now()).await?;
        Ok(json!(outcome.user_op_hash))
    }

    async fn eth_estimate_user_operation_gas(&self, params: Value) -> Result<Value, BundlerError> {
        let (op, entry_point) = parse_send_params(params).map_err(wire_err)?;
        self.exec.validation().check_input(entry_point, &op)?;
        let output = self.exec.validation().validate(&op, self.now(), None).await?;
        let pre_verification_gas = calc_pre_verification_gas(&op, Default::default());
        Ok(json!({
            "preVerificationGas": encode_u256(pre_verification_gas),
            "verificationGasLimit": encode_u256(output.pre_op_gas),
            "callGasLimit": encode_u256(op.call_gas_limit),
            "validAfter": output.valid_after,
            "validUntil": output.valid_until,
        }))
    }

    fn eth_get_user_operation_by_hash(&self, params: Value) -> Result<Value, BundlerError> {
        let Some(hash) = parse_hash_param(params) else {
            return Err(BundlerError::InvalidParams("expected a userOpHash".into()));
        };
        match self.exec.mempool().get_by_hash(hash) {
            Some(entry) => Ok(json!({
                "userOperation": UserOperationWire::from(&entry.user_op),
                "entryPoint": self.exec.entry_point(),
                "transactionHash": Value::Null,
                "blockHash": Value::Null,
                "blockNumber": Value::Null,
            })),
            None => Ok(Value::Null),
        }
    }

    fn debug_dump_mempool(&self) -> Value {
        let ops: Vec<_> = self.exec.mempool().dump().iter().map(|e| UserOperationWire::from(&e.user_op)).collect();
        json!(ops)
    }

    fn debug_set_reputation(&self, params: Value) -> Result<Value, BundlerError> {
        let entries: Vec<ReputationEntry> =
            serde_json::from_value(params).map_err(|e| BundlerError::InvalidParams(e.to_string()))?;
        self.exec.reputation().set_entries(entries);
        Ok(reputation_entries_to_value(&self.exec.reputation().dump()))
    }

    fn debug_set_bundling_mode(&self, params: Value) -> Result<Value, BundlerError> {
        let mode = params
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .ok_or_else(|| BundlerError::InvalidParams("expected 'auto' or 'manual'".into()))?;
        let mode = match mode {
            "auto" => BundlingMode::Auto,
            "manual" => BundlingMode::Manual,
            other => return Err(BundlerError::InvalidParams(format!("unknown bundling mode: {other}"))),
        };
        let (interval_s, max_pool_size) = mode.resolve();
        self.exec.set_auto_bundler(interval_s, max_pool_size);
        Ok(json!("ok"))
    }

    fn debug_set_bundle_interval(&self, params: Value) -> Result<Value, BundlerError> {
        let arr = params.as_array().ok_or_else(|| BundlerError::InvalidParams("expected [interval]".into()))?;
        let interval_s = arr.first().and_then(Value::as_u64).unwrap_or(0);
        let max_pool_size = arr.get(1).and_then(Value::as_u64).unwrap_or(100);
        self.exec.set_auto_bundler(interval_s, max_pool_size);
        Ok(json!("ok"))
    }

    async fn debug_send_bundle_now(&self) -> Result<Value, BundlerError> {
        self.exec.attempt_bundle(true).await;
        Ok(json!("ok"))
    }

    async fn debug_get_stake_status(&self, params: Value) -> Result<Value, BundlerError> {
        let arr = params.as_array().ok_or_else(|| BundlerError::InvalidParams("expected (addr, entryPoint)".into()))?;
        let addr: Address = arr
            .first()
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| BundlerError::InvalidParams("invalid address".into()))?;
        let entry_point: Address = arr
            .get(1)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| self.exec.entry_point());
        let (stake_info, is_staked) = self.exec.reputation().get_stake_status(addr, entry_point).await?;
        Ok(json!({
            "stakeInfo": {
                "addr": stake_info.addr,
                "stake": encode_u256(stake_info.stake),
                "unstakeDelaySec": stake_info.unstake_delay_sec,
            },
            "isStaked": is_staked,
        }))
    }
}

#[async_trait]
impl<P: NodeProvider + 'static> RpcHandler for BundlerRpc<P> {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let result = match method {
            "eth_chainId" => Ok(json!(self.chain_id)),
            "eth_supportedEntryPoints" => Ok(json!([self.exec.entry_point()])),
            "eth_sendUserOperation" => self.eth_send_user_operation(params).await,
            "eth_estimateUserOperationGas" => self.eth_estimate_user_operation_gas(params).await,
            "eth_getUserOperationByHash" => self.eth_get_user_operation_by_hash(params),
            // On-chain receipt data isn't tracked by this crate; an op not
            // yet mined never has one to return.
            "eth_getUserOperationReceipt" => Ok(Value::Null),
            "web3_clientVersion" => Ok(json!(self.client_version())),
            "debug_bundler_clearState" => {
                self.exec.mempool().clear();
                self.exec.reputation().clear();
                Ok(json!("ok"))
            }
            "debug_bundler_clearMempool" => {
                self.exec.mempool().clear();
                Ok(json!("ok"))
            }
            "debug_bundler_clearReputation" => {
                self.exec.reputation().clear();
                Ok(json!("ok"))
            }
            "debug_bundler_dumpMempool" => Ok(self.debug_dump_mempool()),
            "debug_bundler_setReputation" => self.debug_set_reputation(params),
            "debug_bundler_dumpReputation" => Ok(reputation_entries_to_value(&self.exec.reputation().dump())),
            "debug_bundler_setBundlingMode" => self.debug_set_bundling_mode(params),
            "debug_bundler_setBundleInterval" => self.debug_set_bundle_interval(params),
            "debug_bundler_sendBundleNow" => self.debug_send_bundle_now().await,
            "debug_bundler_getStakeStatus" => self.debug_get_stake_status(params).await,
            _ => return Err(RpcError::method_not_found(method)),
        };
        result.map_err(RpcError::from)
    }
}

fn wire_err(e: WireError) -> BundlerError {
    BundlerError::InvalidParams(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleManager;
    use crate::events::EventsManager;
    use crate::mempool::MempoolManager;
    use crate::reputation::{ReputationManager, ReputationParams};
    use crate::testutil::MockNodeProvider;
    use crate::validation::ValidationManager;
    use alloy_primitives::{Bytes, U256};

    const EP: Address = Address::repeat_byte(0xEE);

    fn harness() -> BundlerRpc<MockNodeProvider> {
        let provider = Arc::new(MockNodeProvider::default());
        let reputation = Arc::new(ReputationManager::new(
            provider.clone(),
            ReputationParams::NON_BUNDLER,
            vec![],
            vec![],
            U256::from(1u64),
            0,
        ));
        let mempool = Arc::new(MempoolManager::new(reputation.clone()));
        let validation = Arc::new(ValidationManager::new(provider.clone(), EP, true));
        let bundle = Arc::new(BundleManager::new(
            provider.clone(),
            mempool.clone(),
            reputation.clone(),
            validation.clone(),
            EP,
            Address::repeat_byte(0xBE),
            U256::ZERO,
            U256::from(5_000_000u64),
            false,
            false,
        ));
        let events = Arc::new(EventsManager::new(provider.clone(), mempool.clone(), reputation.clone(), EP));
        let exec =
            Arc::new(ExecutionManager::new(provider, mempool, reputation, validation, bundle, events, EP, 1337));
        BundlerRpc::new(exec, 1337, true)
    }

    #[tokio::test]
    async fn chain_id_and_entry_points_are_reported() {
        let rpc = harness();
        assert_eq!(rpc.handle("eth_chainId", Value::Null).await.unwrap(), json!(1337));
        let entry_points = rpc.handle("eth_supportedEntryPoints", Value::Null).await.unwrap();
        assert_eq!(entry_points, json!([EP]));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let rpc = harness();
        let err = rpc.handle("nonexistent_method", Value::Null).await.unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[tokio::test]
    async fn client_version_carries_unsafe_suffix() {
        let rpc = harness();
        let version = rpc.handle("web3_clientVersion", Value::Null).await.unwrap();
        assert!(version.as_str().unwrap().ends_with("/unsafe"));
    }

    #[tokio::test]
    async fn send_user_operation_then_dump_mempool_round_trips() {
        let rpc = harness();
        let wire = UserOperationWire {
            sender: Address::repeat_byte(1),
            nonce: "0x0".to_string(),
            init_code: Bytes::new(),
            call_data: Bytes::new(),
            call_gas_limit: "0xc350".to_string(),
            verification_gas_limit: "0x186a0".to_string(),
            pre_verification_gas: "0x186a0".to_string(),
            max_fee_per_gas: "0x77359400".to_string(),
            max_priority_fee_per_gas: "0x3b9aca00".to_string(),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        };
        let params = json!([wire, EP]);
        let result = rpc.handle("eth_sendUserOperation", params).await.unwrap();
        assert!(result.is_string());

        let dumped = rpc.handle("debug_bundler_dumpMempool", Value::Null).await.unwrap();
        assert_eq!(dumped.as_array().unwrap().len(), 1);

        rpc.handle("debug_bundler_clearMempool", Value::Null).await.unwrap();
        let dumped = rpc.handle("debug_bundler_dumpMempool", Value::Null).await.unwrap();
        assert!(dumped.as_array().unwrap().is_empty());
    }
}
