// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dbft_traits::{GasBalanceLookup, UInt160};

/// In-memory GAS balances.
///
/// Unknown accounts hold zero. Lookups can be switched to fail to exercise
/// error paths.
#[derive(Debug, Default)]
pub struct MockGasBalances {
    balances: Mutex<HashMap<UInt160, u64>>,
    fail: Mutex<bool>,
}

impl MockGasBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the balance of `account`.
    pub fn set_balance(&self, account: UInt160, balance: u64) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert(account, balance);
        }
    }

    /// Make every subsequent lookup fail (or succeed again).
    pub fn fail_lookups(&self, fail: bool) {
        if let Ok(mut flag) = self.fail.lock() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl GasBalanceLookup for MockGasBalances {
    async fn gas_balance(&self, account: &UInt160) -> dbft_traits::Result<u64> {
        if self.fail.lock().map(|flag| *flag).unwrap_or(true) {
            anyhow::bail!("balance snapshot unavailable");
        }
        let balances = self
            .balances
            .lock()
            .map_err(|_| anyhow::anyhow!("balance table poisoned"))?;
        Ok(balances.get(account).copied().unwrap_or(0))
    }
}
