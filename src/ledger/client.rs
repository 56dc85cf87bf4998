//! Typed ledger surface over the failover JSON-RPC client
//!
//! The ledger is reached through a JSON-RPC gateway exposing
//! `ledger_call`, `ledger_sendTransaction`, `ledger_getTransactionReceipt`,
//! `ledger_blockNumber` and `ledger_getLogs`. Writes return only after the
//! configured confirmation depth is reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::models::{LedgerEvent, RoundInfo, TxReceipt};
use crate::rpc::FailoverClient;

use super::encoding::{decode, parse_token_id};
use super::error::LedgerError;

/// Ledger operations the coordination core depends on
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Id of the current round; 0 when no round was ever created
    async fn current_round_id(&self) -> Result<u64, LedgerError>;

    async fn get_round(&self, round_id: u64) -> Result<RoundInfo, LedgerError>;

    async fn create_round(&self, start_time: i64, end_time: i64) -> Result<TxReceipt, LedgerError>;

    /// Commit the snapshot of `round_id`; token ids must already be encoded
    async fn push_snapshot(
        &self,
        round_id: u64,
        owners: &[String],
        token_ids: &[u128],
    ) -> Result<TxReceipt, LedgerError>;

    async fn draw_winner(&self, round_id: u64) -> Result<TxReceipt, LedgerError>;

    /// Current owner of a token, `None` if the token does not exist
    async fn owner_of(&self, token_id: u128) -> Result<Option<String>, LedgerError>;

    async fn block_number(&self) -> Result<u64, LedgerError>;

    async fn query_logs(
        &self,
        events: &[&str],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;
}

/// Confirmation-depth settings for writes
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            confirmations: 2,
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// [`LedgerClient`] backed by the failover JSON-RPC client
pub struct JsonRpcLedger {
    rpc: Arc<FailoverClient>,
    confirmation: ConfirmationPolicy,
}

impl JsonRpcLedger {
    pub fn new(rpc: Arc<FailoverClient>, confirmation: ConfirmationPolicy) -> Self {
        Self { rpc, confirmation }
    }

    pub fn rpc(&self) -> &Arc<FailoverClient> {
        &self.rpc
    }

    async fn view(&self, method: &str, args: Value) -> Result<Value, LedgerError> {
        let params = json!({ "method": method, "args": args });
        Ok(self.rpc.call("ledger_call", params).await?)
    }

    async fn transact(
        &self,
        method: &str,
        args: Value,
        idempotency_key: &str,
    ) -> Result<TxReceipt, LedgerError> {
        let params = json!({
            "method": method,
            "args": args,
            "idempotencyKey": idempotency_key,
        });
        let raw = self.rpc.send("ledger_sendTransaction", params).await?;
        let receipt: TxReceipt = serde_json::from_value(raw)
            .map_err(|e| LedgerError::decode("ledger_sendTransaction", e.to_string()))?;

        if !receipt.status {
            return Err(LedgerError::TxFailed {
                tx_hash: receipt.tx_hash,
            });
        }

        tracing::info!(
            method = method,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            "Ledger transaction submitted"
        );

        self.wait_for_confirmations(receipt).await
    }

    async fn wait_for_confirmations(&self, submitted: TxReceipt) -> Result<TxReceipt, LedgerError> {
        let wanted = self.confirmation.confirmations;
        if wanted == 0 {
            return Ok(submitted);
        }

        let started = Instant::now();
        loop {
            let raw = self
                .rpc
                .call("ledger_getTransactionReceipt", json!([submitted.tx_hash]))
                .await?;

            if !raw.is_null() {
                let receipt: TxReceipt = serde_json::from_value(raw).map_err(|e| {
                    LedgerError::decode("ledger_getTransactionReceipt", e.to_string())
                })?;
                if !receipt.status {
                    return Err(LedgerError::TxFailed {
                        tx_hash: receipt.tx_hash,
                    });
                }

                let head = self.block_number().await?;
                let depth = head.saturating_sub(receipt.block_number) + 1;
                if depth >= wanted {
                    return Ok(TxReceipt {
                        confirmations: depth,
                        ..receipt
                    });
                }
            }

            if started.elapsed() >= self.confirmation.timeout {
                return Err(LedgerError::ConfirmationTimeout {
                    tx_hash: submitted.tx_hash,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.confirmation.poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn current_round_id(&self) -> Result<u64, LedgerError> {
        let raw = self.view("currentRoundId", json!([])).await?;
        as_u64(&raw).ok_or_else(|| LedgerError::decode("currentRoundId", raw.to_string()))
    }

    async fn get_round(&self, round_id: u64) -> Result<RoundInfo, LedgerError> {
        let raw = self.view("getRound", json!([round_id.to_string()])).await?;
        parse_round(round_id, &raw)
    }

    async fn create_round(&self, start_time: i64, end_time: i64) -> Result<TxReceipt, LedgerError> {
        let key = format!("create-round-{start_time}-{end_time}");
        self.transact(
            "createRound",
            json!([start_time.to_string(), end_time.to_string()]),
            &key,
        )
        .await
    }

    async fn push_snapshot(
        &self,
        round_id: u64,
        owners: &[String],
        token_ids: &[u128],
    ) -> Result<TxReceipt, LedgerError> {
        let ids: Vec<String> = token_ids.iter().map(u128::to_string).collect();
        let key = format!("round-{round_id}-snapshot");
        self.transact("pushSnapshot", json!([round_id.to_string(), owners, ids]), &key)
            .await
    }

    async fn draw_winner(&self, round_id: u64) -> Result<TxReceipt, LedgerError> {
        let key = format!("round-{round_id}-draw");
        self.transact("drawWinner", json!([round_id.to_string()]), &key)
            .await
    }

    async fn owner_of(&self, token_id: u128) -> Result<Option<String>, LedgerError> {
        match self.view("ownerOf", json!([token_id.to_string()])).await {
            Ok(Value::String(owner)) if !is_zero_address(&owner) => Ok(Some(owner)),
            Ok(Value::String(_)) | Ok(Value::Null) => Ok(None),
            Ok(other) => Err(LedgerError::decode("ownerOf", other.to_string())),
            Err(LedgerError::Revert { name, .. }) => {
                tracing::debug!(token_id = %token_id, revert = %name, "ownerOf reverted");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let raw = self.rpc.call("ledger_blockNumber", json!([])).await?;
        as_u64(&raw).ok_or_else(|| LedgerError::decode("ledger_blockNumber", raw.to_string()))
    }

    async fn query_logs(
        &self,
        events: &[&str],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let params = json!({
            "events": events,
            "fromBlock": from_block,
            "toBlock": to_block,
        });
        let raw = self.rpc.call("ledger_getLogs", params).await?;
        serde_json::from_value(raw).map_err(|e| LedgerError::decode("ledger_getLogs", e.to_string()))
    }
}

/// Decode a `getRound` result object
pub fn parse_round(round_id: u64, raw: &Value) -> Result<RoundInfo, LedgerError> {
    let field = |name: &str| {
        raw.get(name)
            .ok_or_else(|| LedgerError::decode("getRound", format!("missing field {name}")))
    };
    let number = |name: &str| -> Result<u64, LedgerError> {
        let v = field(name)?;
        as_u64(v).ok_or_else(|| LedgerError::decode("getRound", format!("{name} is not a number")))
    };
    let flag = |name: &str| -> Result<bool, LedgerError> {
        field(name)?
            .as_bool()
            .ok_or_else(|| LedgerError::decode("getRound", format!("{name} is not a bool")))
    };

    let winner = raw
        .get("winner")
        .and_then(Value::as_str)
        .filter(|w| !is_zero_address(w))
        .map(str::to_string);

    let winning_token_id = match raw.get("winningTokenId") {
        Some(Value::String(s)) => parse_token_id(s),
        Some(Value::Number(n)) => n.as_u64().map(u128::from),
        _ => None,
    }
    .filter(|id| *id != 0)
    .map(decode);

    Ok(RoundInfo {
        round_number: round_id,
        start_time: number("startTime")? as i64,
        end_time: number("endTime")? as i64,
        is_active: flag("isActive")?,
        is_completed: flag("isCompleted")?,
        winner,
        winning_token_id,
        total_entries: raw.get("totalEntries").and_then(as_u64).unwrap_or(0),
    })
}

/// Accept JSON numbers, decimal strings and `0x` hex strings
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    }
}

fn is_zero_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .map_or(false, |hex| !hex.is_empty() && hex.chars().all(|c| c == '0'))
}
