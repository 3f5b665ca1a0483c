// SPDX-License-Identifier: AGPL-3.0-only

//! In-Memory-ChainClient für Tests und den Dev-Betrieb des Nodes.

use crate::{
    AbsorbTxBuilder, BlockchainState, ChainClient, ChainError, CoinRecord, Hash32, SignagePoint,
    SingletonChainState, TxStatus,
};
use sp_types::LauncherId;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct MockInner {
    state: BlockchainState,
    signage_points: VecDeque<SignagePoint>,
    singletons: HashMap<LauncherId, SingletonChainState>,
    coin_records: HashMap<Hash32, Vec<CoinRecord>>,
    pushed_txs: Vec<Vec<u8>>,
    reject_txs: bool,
    fail_next: Option<ChainError>,
}

#[derive(Default)]
pub struct MockChainClient {
    inner: Mutex<MockInner>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, state: BlockchainState) {
        if let Ok(mut g) = self.inner.lock() {
            g.state = state;
        }
    }

    pub fn push_signage_point(&self, sp: SignagePoint) {
        if let Ok(mut g) = self.inner.lock() {
            g.signage_points.push_back(sp);
        }
    }

    pub fn set_singleton(&self, st: SingletonChainState) {
        if let Ok(mut g) = self.inner.lock() {
            g.singletons.insert(st.launcher_id, st);
        }
    }

    pub fn remove_singleton(&self, launcher_id: &LauncherId) {
        if let Ok(mut g) = self.inner.lock() {
            g.singletons.remove(launcher_id);
        }
    }

    pub fn set_coin_records(&self, puzzle_hash: Hash32, records: Vec<CoinRecord>) {
        if let Ok(mut g) = self.inner.lock() {
            g.coin_records.insert(puzzle_hash, records);
        }
    }

    pub fn set_reject_txs(&self, reject: bool) {
        if let Ok(mut g) = self.inner.lock() {
            g.reject_txs = reject;
        }
    }

    /// Nächster Aufruf schlägt mit dem gegebenen Fehler fehl (einmalig).
    pub fn fail_next(&self, e: ChainError) {
        if let Ok(mut g) = self.inner.lock() {
            g.fail_next = Some(e);
        }
    }

    pub fn pushed_tx_count(&self) -> usize {
        self.inner.lock().map(|g| g.pushed_txs.len()).unwrap_or(0)
    }

    fn take_injected_failure(&self) -> Option<ChainError> {
        self.inner.lock().ok().and_then(|mut g| g.fail_next.take())
    }
}

impl ChainClient for MockChainClient {
    fn blockchain_state(&self) -> Result<BlockchainState, ChainError> {
        if let Some(e) = self.take_injected_failure() {
            return Err(e);
        }
        self.inner
            .lock()
            .map(|g| g.state)
            .map_err(|_| ChainError::Transport("mock poisoned".into()))
    }

    fn poll_signage_point(&self) -> Result<Option<SignagePoint>, ChainError> {
        if let Some(e) = self.take_injected_failure() {
            return Err(e);
        }
        self.inner
            .lock()
            .map(|mut g| g.signage_points.pop_front())
            .map_err(|_| ChainError::Transport("mock poisoned".into()))
    }

    fn coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash32,
        start_height: u32,
    ) -> Result<Vec<CoinRecord>, ChainError> {
        if let Some(e) = self.take_injected_failure() {
            return Err(e);
        }
        let g = self
            .inner
            .lock()
            .map_err(|_| ChainError::Transport("mock poisoned".into()))?;
        Ok(g.coin_records
            .get(puzzle_hash)
            .map(|v| {
                v.iter()
                    .filter(|r| r.confirmed_height >= start_height)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn singleton_state(
        &self,
        launcher_id: &LauncherId,
    ) -> Result<Option<SingletonChainState>, ChainError> {
        if let Some(e) = self.take_injected_failure() {
            return Err(e);
        }
        let g = self
            .inner
            .lock()
            .map_err(|_| ChainError::Transport("mock poisoned".into()))?;
        Ok(g.singletons.get(launcher_id).cloned())
    }

    fn push_tx(&self, serialized_tx: &[u8]) -> Result<TxStatus, ChainError> {
        if let Some(e) = self.take_injected_failure() {
            return Err(e);
        }
        let mut g = self
            .inner
            .lock()
            .map_err(|_| ChainError::Transport("mock poisoned".into()))?;
        if g.reject_txs {
            return Ok(TxStatus::Rejected);
        }
        g.pushed_txs.push(serialized_tx.to_vec());
        Ok(TxStatus::Accepted)
    }
}

/// Trivialer Tx-Builder: kodiert launcher/amount/fee deterministisch; die echte
/// Chialisp-Konstruktion ist Sache des externen Kollaborateurs.
#[derive(Default)]
pub struct MockAbsorbTxBuilder;

impl AbsorbTxBuilder for MockAbsorbTxBuilder {
    fn build_absorb_tx(
        &self,
        launcher_id: &LauncherId,
        amount: u64,
        fee: u32,
    ) -> Result<Vec<u8>, ChainError> {
        let mut out = Vec::with_capacity(32 + 8 + 4);
        out.extend_from_slice(&launcher_id.0);
        out.extend_from_slice(&amount.to_le_bytes());
        out.extend_from_slice(&fee.to_le_bytes());
        Ok(out)
    }

    fn sign_absorb_tx(&self, tx_bytes: &[u8], _privkey: &[u8; 32]) -> Result<Vec<u8>, ChainError> {
        let mut out = tx_bytes.to_vec();
        out.extend_from_slice(b"signed");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signage_points_drain_in_order() {
        let mock = MockChainClient::new();
        for i in 0..3u32 {
            mock.push_signage_point(SignagePoint {
                challenge_hash: [i as u8; 32],
                signage_point_index: i,
                peak_height: 100 + i,
                timestamp: 1000 + i as u64,
            });
        }
        assert_eq!(mock.poll_signage_point().unwrap().unwrap().signage_point_index, 0);
        assert_eq!(mock.poll_signage_point().unwrap().unwrap().signage_point_index, 1);
        assert_eq!(mock.poll_signage_point().unwrap().unwrap().signage_point_index, 2);
        assert!(mock.poll_signage_point().unwrap().is_none());
    }

    #[test]
    fn injected_failure_fires_once() {
        let mock = MockChainClient::new();
        mock.fail_next(ChainError::Timeout);
        assert!(mock.blockchain_state().is_err());
        assert!(mock.blockchain_state().is_ok());
    }

    #[test]
    fn coin_records_filtered_by_height() {
        let mock = MockChainClient::new();
        let ph = [7u8; 32];
        mock.set_coin_records(
            ph,
            vec![
                CoinRecord {
                    coin_id: [1; 32],
                    puzzle_hash: ph,
                    parent_coin_id: [0; 32],
                    amount: 10,
                    confirmed_height: 50,
                    spent: false,
                },
                CoinRecord {
                    coin_id: [2; 32],
                    puzzle_hash: ph,
                    parent_coin_id: [0; 32],
                    amount: 20,
                    confirmed_height: 150,
                    spent: false,
                },
            ],
        );
        let got = mock.coin_records_by_puzzle_hash(&ph, 100).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].amount, 20);
    }

    #[test]
    fn absorb_tx_builder_roundtrip() {
        let b = MockAbsorbTxBuilder;
        let tx = b.build_absorb_tx(&LauncherId([9; 32]), 1234, 5).unwrap();
        assert_eq!(tx.len(), 44);
        let signed = b.sign_absorb_tx(&tx, &[0u8; 32]).unwrap();
        assert!(signed.ends_with(b"signed"));
    }
}
