// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;

use async_trait::async_trait;
use dbft_traits::{
    HashOrIndex, Header, LedgerStore, PublicKey, TrimmedBlock, UInt256, ValidatorRegistry,
};

/// An append-only chain of trimmed blocks kept in memory
#[derive(Debug)]
pub struct MockLedgerStore {
    blocks: Mutex<Vec<TrimmedBlock>>,
}

impl MockLedgerStore {
    /// Create a ledger holding only `genesis`.
    pub fn new(genesis: Header) -> Self {
        Self {
            blocks: Mutex::new(vec![TrimmedBlock {
                header: genesis,
                hashes: Vec::new(),
            }]),
        }
    }

    /// Append a header on top of the current tip.
    ///
    /// The header's `index` and `previous_hash` are overwritten to chain onto
    /// the tip. Returns the new block hash.
    pub fn push(&self, mut header: Header) -> UInt256 {
        let Ok(mut blocks) = self.blocks.lock() else {
            return UInt256::ZERO;
        };
        if let Some(tip) = blocks.last() {
            header.index = tip.header.index + 1;
            header.previous_hash = tip.hash();
        }
        let hash = header.hash();
        blocks.push(TrimmedBlock {
            header,
            hashes: Vec::new(),
        });
        hash
    }

    fn with_blocks<T>(&self, f: impl FnOnce(&[TrimmedBlock]) -> T) -> dbft_traits::Result<T> {
        let blocks = self
            .blocks
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger poisoned"))?;
        Ok(f(&blocks))
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn header(&self, key: HashOrIndex) -> dbft_traits::Result<Option<Header>> {
        self.with_blocks(|blocks| {
            blocks
                .iter()
                .find(|block| match key {
                    HashOrIndex::Hash(hash) => block.hash() == hash,
                    HashOrIndex::Index(index) => block.index() == index,
                })
                .map(|block| block.header.clone())
        })
    }

    async fn trimmed_block(&self, hash: UInt256) -> dbft_traits::Result<Option<TrimmedBlock>> {
        self.with_blocks(|blocks| blocks.iter().find(|block| block.hash() == hash).cloned())
    }

    async fn current_index(&self) -> dbft_traits::Result<u32> {
        self.with_blocks(|blocks| blocks.last().map(TrimmedBlock::index).unwrap_or(0))
    }

    async fn current_hash(&self) -> dbft_traits::Result<UInt256> {
        self.with_blocks(|blocks| blocks.last().map(TrimmedBlock::hash).unwrap_or(UInt256::ZERO))
    }
}

/// Registry returning fixed committees
#[derive(Clone, Debug)]
pub struct MockValidatorRegistry {
    current: Vec<PublicKey>,
    next: Vec<PublicKey>,
}

impl MockValidatorRegistry {
    /// Same committee now and for the next block.
    pub fn fixed(validators: Vec<PublicKey>) -> Self {
        Self {
            current: validators.clone(),
            next: validators,
        }
    }

    /// Committee that changes at the next block.
    pub fn rotating(current: Vec<PublicKey>, next: Vec<PublicKey>) -> Self {
        Self { current, next }
    }
}

#[async_trait]
impl ValidatorRegistry for MockValidatorRegistry {
    async fn validators(&self) -> dbft_traits::Result<Vec<PublicKey>> {
        Ok(self.current.clone())
    }

    async fn next_block_validators(&self) -> dbft_traits::Result<Vec<PublicKey>> {
        Ok(self.next.clone())
    }
}
