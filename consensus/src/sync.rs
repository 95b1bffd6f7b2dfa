use std::cmp;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use nimiq_accounts::{Accounts, AccountsTransaction, AccountsTreeChunk, ChunkError, PartialAccountsTree};
use nimiq_blockchain::{Blockchain, ChainInfo, ChainProof, ChainStore, PushResult as BlockchainPushResult};
use nimiq_database::{Environment, Transaction, WriteTransaction};
use nimiq_hash::{Blake2bHash, Hash};
use nimiq_primitives::block::{Block, Difficulty, Target, TargetCompact};
use nimiq_primitives::networks::{get_network_info, NetworkId};
use nimiq_primitives::policy;
use nimiq_utils::observer::Notifier;
use nimiq_utils::time::NetworkTime;

use crate::proof_evaluator::ProofEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    ProveChain,
    ProveAccountsTree,
    ProveBlocks,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    Extended,
    Rebranched,
    Forked,
    Known,
    Orphan,
    Invalid,
    IncorrectProof,
}

/// Maps the base chain's own result codes onto this synchronizer's,
/// used once `pushBlock` starts delegating forward pushes to `Blockchain`
/// in `COMPLETE` (spec.md §4.4, §6's stable result-code contract).
fn map_blockchain_push_result(result: BlockchainPushResult) -> PushResult {
    match result {
        BlockchainPushResult::Extended => PushResult::Extended,
        BlockchainPushResult::Rebranched => PushResult::Rebranched,
        BlockchainPushResult::Forked => PushResult::Forked,
        BlockchainPushResult::Known => PushResult::Known,
        BlockchainPushResult::Orphan => PushResult::Orphan,
        BlockchainPushResult::Invalid(_) => PushResult::Invalid,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPushResult {
    Complete,
    Unfinished,
    IncorrectProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    HeadChanged(Blake2bHash),
    Complete { proof: ChainProof, head_hash: Blake2bHash, main_chain: Block },
    Committed { proof: ChainProof, head_hash: Blake2bHash, main_chain: Block },
    Aborted,
}

/// Phase-specific state, carried as an enum payload instead of nullable
/// fields (spec.md §9 design notes - the same choice `ChainState` already
/// makes for "extendable or not").
enum Phase<'env> {
    ProveChain,
    ProveAccountsTree { partial_tree: PartialAccountsTree },
    ProveBlocks { accounts_tx: AccountsTransaction<'env>, proof_head: ChainInfo },
    Complete,
    Aborted,
}

struct Inner<'env> {
    phase: Phase<'env>,
    store_txn: Option<WriteTransaction<'env>>,
    /// The completed accounts snapshot, staged into its own transaction on
    /// entry to `PROVE_BLOCKS` (spec.md §4.3 step 1) and held here until
    /// `commit`/`abort` - kept entirely separate from `Phase::ProveBlocks`'s
    /// `accounts_tx`, which only ever verifies the reverse replay and is
    /// always discarded.
    accounts_snapshot_txn: Option<WriteTransaction<'env>>,
    current_proof: ChainProof,
    head_hash: Blake2bHash,
    /// `proofHead.head.height` as it stood when `PROVE_BLOCKS` was entered;
    /// `needsMoreBlocks` measures progress against this fixed mark, not the
    /// ever-shrinking current height.
    initial_proof_head_height: u32,
    completed_main_chain: Option<Block>,
}

/// Drives a chain proof from adoption through to a fully reverse-verified
/// suffix (spec.md §2 "Four-Phase State Machine"). Holds its own
/// `ChainStore`/`Accounts` against a shared `Environment`; nothing is
/// visible to a concurrently running `Blockchain` until `commit()`.
///
/// Every public operation serializes on `sync_lock`, mirroring
/// `Blockchain::push_lock` - the synchronizer services one pushed proof,
/// chunk or block at a time, in the order callers offer them.
pub struct PartialLightChainSynchronizer<'env> {
    network_id: NetworkId,
    network_time: Arc<NetworkTime>,
    chain_store: ChainStore<'env>,
    accounts: Accounts<'env>,
    /// The base chain this synchronizer's forward pushes are handed off to
    /// once `COMPLETE` (spec.md §4.4, SPEC_FULL.md's crate layout) - the
    /// caller owns its lifecycle and is expected to construct it against
    /// the same `Environment` this synchronizer was given, after any prior
    /// sync this instance continues has already been committed.
    blockchain: &'env Blockchain<'env>,
    pub notifier: RwLock<Notifier<'env, SyncEvent>>,
    sync_lock: Mutex<()>,
    inner: RwLock<Inner<'env>>,
}

impl<'env> PartialLightChainSynchronizer<'env> {
    /// `current_proof` is the preexisting proof this synchronizer measures
    /// new proofs against - a degenerate genesis-only proof if nothing has
    /// been synced yet. `blockchain` is the forward-push delegate for once
    /// this sync reaches `COMPLETE`; it is never consulted before then.
    pub fn new(env: &'env Environment, network_id: NetworkId, network_time: Arc<NetworkTime>, current_proof: ChainProof, blockchain: &'env Blockchain<'env>) -> Self {
        let chain_store = ChainStore::new(env);
        let accounts = Accounts::new(env);

        let head_hash = chain_store
            .get_head(None)
            .unwrap_or_else(|| current_proof.prefix.last().expect("a chain proof always has a non-empty prefix").hash());

        PartialLightChainSynchronizer {
            network_id,
            network_time,
            chain_store,
            accounts,
            blockchain,
            notifier: RwLock::new(Notifier::new()),
            sync_lock: Mutex::new(()),
            inner: RwLock::new(Inner {
                phase: Phase::ProveChain,
                store_txn: Some(WriteTransaction::new(env)),
                accounts_snapshot_txn: None,
                current_proof,
                head_hash,
                initial_proof_head_height: 0,
                completed_main_chain: None,
            }),
        }
    }

    pub fn state(&self) -> SyncState {
        match self.inner.read().phase {
            Phase::ProveChain => SyncState::ProveChain,
            Phase::ProveAccountsTree { .. } => SyncState::ProveAccountsTree,
            Phase::ProveBlocks { .. } => SyncState::ProveBlocks,
            Phase::Complete => SyncState::Complete,
            Phase::Aborted => SyncState::Aborted,
        }
    }

    /// The accounts-tree address prefix still missing from the current
    /// snapshot, if we're in `PROVE_ACCOUNTS_TREE`.
    pub fn get_missing_accounts_prefix(&self) -> Option<String> {
        match &self.inner.read().phase {
            Phase::ProveAccountsTree { partial_tree } => partial_tree.missing_prefix(),
            _ => None,
        }
    }

    /// The current height of the proof head as the Reverse Block Applier
    /// walks it backward, if we're in `PROVE_BLOCKS`.
    pub fn proof_head_height(&self) -> Option<u32> {
        match &self.inner.read().phase {
            Phase::ProveBlocks { proof_head, .. } => Some(proof_head.head.header.height),
            _ => None,
        }
    }

    pub fn needs_more_blocks(&self) -> bool {
        let inner = self.inner.read();
        match &inner.phase {
            Phase::ProveBlocks { proof_head, .. } => needs_more_blocks(inner.initial_proof_head_height, proof_head),
            _ => false,
        }
    }

    /// Exponential-backoff block locators, identical to
    /// `Blockchain::get_block_locators` but read through this
    /// synchronizer's own (possibly still store-transaction-only) chain
    /// view (spec.md supplemented feature "getBlockLocators").
    pub fn get_block_locators(&self, max_count: usize) -> Vec<Blake2bHash> {
        let inner = self.inner.read();
        let txn = self.store_txn_ref(&inner);

        let mut hash = inner.head_hash.clone();
        let mut locators = vec![hash.clone()];

        let height = self.chain_store.get_chain_info(&hash, false, txn).map(|info| info.head.header.height).unwrap_or(0);

        for _ in 0..cmp::min(10, height) {
            match self.chain_store.get_block(&hash, false, txn) {
                Some(block) => {
                    hash = block.header.prev_hash.clone();
                    locators.push(hash.clone());
                }
                None => break,
            }
        }

        let mut step = 2;
        let mut h = height.saturating_sub(10 + step);
        let mut opt_block = self.chain_store.get_chain_info_at(h, false, txn).map(|info| info.head);
        while let Some(block) = opt_block {
            locators.push(block.hash());

            if locators.len() >= max_count {
                break;
            }

            step *= 2;
            h = match h.checked_sub(step) {
                Some(0) => break,
                Some(v) => v,
                None => break,
            };

            opt_block = self.chain_store.get_chain_info_at(h, false, txn).map(|info| info.head);
        }

        let genesis_hash = get_network_info(self.network_id).unwrap().genesis_hash;
        if locators.is_empty() || locators.last().unwrap() != &genesis_hash {
            if locators.len() >= max_count {
                locators.pop();
            }
            locators.push(genesis_hash);
        }

        locators
    }

    /// Chain Suffix Applier entry point (spec.md §4.2). Only legal in
    /// `PROVE_CHAIN`. A structurally invalid proof is rejected without side
    /// effects. A structurally valid but *worse* proof aborts the
    /// synchronizer outright rather than just being turned away - this
    /// mirrors an established quirk (spec.md §9 open question): pushing a
    /// worse proof still returns `true` (the push itself was accepted),
    /// while the synchronizer moves straight to `ABORTED`.
    pub fn push_proof(&self, proof: ChainProof) -> bool {
        let _guard = self.sync_lock.lock();
        let mut inner = self.inner.write();

        if !matches!(inner.phase, Phase::ProveChain) {
            warn!("Rejecting proof - wrong phase");
            return false;
        }

        let reconstructed_suffix = match ProofEvaluator::verify(&proof) {
            Some(suffix) => suffix,
            None => {
                warn!("Rejecting proof - verification failed");
                return false;
            }
        };

        if !ProofEvaluator::is_better_proof(&proof, &inner.current_proof, policy::M) {
            debug!("Proof is not better than the current one - aborting sync");
            self.abort_locked(&mut inner);
            return true;
        }

        self.apply_chain_suffix(&mut inner, proof, reconstructed_suffix);
        true
    }

    /// Accounts Snapshot Sink (spec.md §4.3). Only legal in
    /// `PROVE_ACCOUNTS_TREE`. Once the tree reports completion, stages it
    /// into its own transaction (the one `commit`/`abort` eventually
    /// resolves - see `Inner::accounts_snapshot_txn`) and opens a *separate*
    /// accounts transaction purely as scratch space for the reverse block
    /// applier's verification walk, then transitions to `PROVE_BLOCKS`.
    pub fn push_accounts_tree_chunk(&self, chunk: AccountsTreeChunk) -> ChunkPushResult {
        let _guard = self.sync_lock.lock();
        let mut inner = self.inner.write();

        let is_complete = match &mut inner.phase {
            Phase::ProveAccountsTree { partial_tree } => match partial_tree.push_chunk(chunk) {
                Ok(()) => partial_tree.is_complete(),
                Err(e) => {
                    warn!("Rejecting accounts chunk - {:?}", e);
                    return ChunkPushResult::IncorrectProof;
                }
            },
            _ => {
                warn!("Rejecting accounts chunk - wrong phase");
                return ChunkPushResult::IncorrectProof;
            }
        };

        if !is_complete {
            trace!("Accounts chunk accepted, snapshot still incomplete");
            return ChunkPushResult::Unfinished;
        }

        let partial_tree = match std::mem::replace(&mut inner.phase, Phase::Aborted) {
            Phase::ProveAccountsTree { partial_tree } => partial_tree,
            _ => unreachable!("checked above"),
        };

        inner.accounts_snapshot_txn = Some(self.accounts.stage_partial_tree(&partial_tree));

        let mut accounts_tx = self.accounts.transaction();
        accounts_tx.commit_partial_tree(&partial_tree);

        let proof_head = self
            .chain_store
            .get_chain_info(&inner.head_hash, true, inner.store_txn.as_deref())
            .expect("the chain suffix applier always leaves a chain entry at head_hash");

        debug!("Accounts snapshot complete, transitioning to PROVE_BLOCKS at height #{}", proof_head.head.header.height);
        inner.initial_proof_head_height = proof_head.head.header.height;
        inner.phase = Phase::ProveBlocks { accounts_tx, proof_head };

        ChunkPushResult::Complete
    }

    /// Reverse Block Applier (spec.md §4.4). Only legal in `PROVE_BLOCKS`,
    /// except that once `COMPLETE` a forward push at the tip is delegated to
    /// `blockchain`'s own normal push path (spec.md §4.4, §4.5 "pushBlock
    /// (forward, at tip)" / `COMPLETE`) - fork choice past that point
    /// belongs to the base chain, not this synchronizer (spec.md §1
    /// Non-goals).
    pub fn push_block(&self, block: Block) -> PushResult {
        let _guard = self.sync_lock.lock();
        let mut inner = self.inner.write();

        match &inner.phase {
            Phase::ProveBlocks { .. } => {}
            Phase::Complete => {
                drop(inner);
                return map_blockchain_push_result(self.blockchain.push(block));
            }
            _ => {
                warn!("Rejecting block - wrong phase");
                return PushResult::IncorrectProof;
            }
        }

        let hash = block.hash();
        let (proof_head_hash, proof_head_prev_hash, proof_head_is_full) = match &inner.phase {
            Phase::ProveBlocks { proof_head, .. } => (proof_head.head.hash(), proof_head.head.header.prev_hash.clone(), proof_head.head.is_full()),
            _ => unreachable!("checked above"),
        };

        // The head-attach path is only open while the proof head is still
        // the header-only block the suffix reconstruction left behind - once
        // a body is attached (or the head has since moved via a prepend,
        // which always carries a body) re-pushing that same block hash no
        // longer matches either direction and is an orphan, not a repeat
        // extend (spec.md §8 property 6).
        if hash == proof_head_hash && !proof_head_is_full {
            self.push_head_block(&mut inner, block)
        } else if hash == proof_head_prev_hash {
            self.push_block_backwards(&mut inner, block)
        } else {
            warn!("Rejecting block - orphan");
            PushResult::Orphan
        }
    }

    /// Validated attachment of the proof head's own body: on initial
    /// adoption, only a header+interlink view of the head was known. No
    /// accounts delta applies (the committed snapshot already reflects the
    /// state at the head), so this only replaces the stored entry and
    /// checks for completion.
    fn push_head_block(&self, inner: &mut Inner<'env>, block: Block) -> PushResult {
        if !block.is_full() {
            warn!("Rejecting head block - body missing");
            return PushResult::Invalid;
        }
        if block.verify(self.network_time.now(), self.network_id).is_err() {
            warn!("Rejecting head block - verification failed");
            return PushResult::Invalid;
        }

        let predecessor = match self.chain_store.get_chain_info(&block.header.prev_hash, false, self.store_txn_ref(inner)) {
            Some(info) => info,
            None => {
                warn!("Rejecting head block - unknown predecessor");
                return PushResult::Orphan;
            }
        };
        if !block.is_immediate_successor_of(&predecessor.head) {
            warn!("Rejecting head block - not an immediate successor of its predecessor");
            return PushResult::Invalid;
        }
        if let Some(next_target) = self.get_next_target(inner, &predecessor) {
            if block.header.n_bits != TargetCompact::from(next_target) {
                warn!("Rejecting head block - difficulty mismatch");
                return PushResult::Invalid;
            }
        }

        let proof_head = match &mut inner.phase {
            Phase::ProveBlocks { proof_head, .. } => proof_head,
            _ => unreachable!("push_block only calls this while in PROVE_BLOCKS"),
        };
        proof_head.head = block.clone();
        let proof_head_snapshot = proof_head.clone();

        let store_txn = inner.store_txn.as_mut().expect("store transaction alive until commit/abort");
        self.chain_store.put_chain_info(store_txn, &block.hash(), &proof_head_snapshot, true);

        debug!("Attached body to proof head at height #{}", block.header.height);
        self.check_completion(inner)
    }

    /// Prepend operation: revert the current proof head's own effects from
    /// the accounts transaction, checking the resulting root against the
    /// accounts hash `block` (the new, older predecessor) declares, then
    /// replace `proofHead` with the prepended entry (spec.md §4.4).
    fn push_block_backwards(&self, inner: &mut Inner<'env>, block: Block) -> PushResult {
        if !block.is_full() {
            warn!("Rejecting block - body missing");
            return PushResult::Invalid;
        }
        if block.verify(self.network_time.now(), self.network_id).is_err() {
            warn!("Rejecting block - verification failed");
            return PushResult::Invalid;
        }

        let proof_head_head = match &inner.phase {
            Phase::ProveBlocks { proof_head, .. } => proof_head.head.clone(),
            _ => unreachable!("push_block only calls this while in PROVE_BLOCKS"),
        };

        if !self.verify_interlink(&block, &proof_head_head) {
            warn!("Rejecting block - interlink mismatch");
            return PushResult::Invalid;
        }
        if !proof_head_head.is_immediate_successor_of(&block) {
            warn!("Rejecting block - not an immediate predecessor of the proof head");
            return PushResult::Invalid;
        }

        let (accounts_tx, proof_head) = match &mut inner.phase {
            Phase::ProveBlocks { accounts_tx, proof_head } => (accounts_tx, proof_head),
            _ => unreachable!("checked above"),
        };

        if let Err(e) = accounts_tx.revert_block_checked(&proof_head.head, &block.header.accounts_hash) {
            warn!("Rejecting block - accounts hash mismatch reverting the proof head: {}", e);
            return PushResult::Invalid;
        }

        let new_info = ChainInfo::prepend(block.clone(), proof_head);
        let store_txn = inner.store_txn.as_mut().expect("store transaction alive until commit/abort");
        self.chain_store.put_chain_info(store_txn, &block.hash(), &new_info, true);

        let height = new_info.head.header.height;
        *proof_head = new_info;
        debug!("Prepended block at height #{}", height);

        self.check_completion(inner)
    }

    fn check_completion(&self, inner: &mut Inner<'env>) -> PushResult {
        let still_needs_more = match &inner.phase {
            Phase::ProveBlocks { proof_head, .. } => needs_more_blocks(inner.initial_proof_head_height, proof_head),
            _ => unreachable!("check_completion only runs while in PROVE_BLOCKS"),
        };

        if still_needs_more {
            return PushResult::Extended;
        }

        self.complete(inner);
        PushResult::Extended
    }

    fn complete(&self, inner: &mut Inner<'env>) {
        let phase = std::mem::replace(&mut inner.phase, Phase::Complete);
        let (accounts_tx, proof_head) = match phase {
            Phase::ProveBlocks { accounts_tx, proof_head } => (accounts_tx, proof_head),
            _ => unreachable!("complete only runs while in PROVE_BLOCKS"),
        };

        // The canonical snapshot already lives in `accounts_snapshot_txn`,
        // staged separately on entry to PROVE_BLOCKS; this transaction only
        // ever verified the reverse replay via `revert_block_checked`, and
        // its state by now is the tip snapshot walked backward to the
        // oldest verified block - exactly what must *not* be persisted
        // (spec.md §9 open question).
        accounts_tx.abort();

        debug!("Sync complete at height #{}", proof_head.head.header.height);
        inner.completed_main_chain = Some(proof_head.head.clone());

        let event = SyncEvent::Complete {
            proof: inner.current_proof.clone(),
            head_hash: inner.head_hash.clone(),
            main_chain: proof_head.head,
        };
        self.notifier.read().notify(event);
    }

    /// Materialize the store transaction accumulated since construction.
    /// Only legal once `COMPLETE`.
    pub fn commit(&self) -> bool {
        let _guard = self.sync_lock.lock();
        let mut inner = self.inner.write();

        if !matches!(inner.phase, Phase::Complete) {
            warn!("Rejecting commit - wrong phase");
            return false;
        }

        let store_txn = inner.store_txn.take().expect("store transaction released only once, by commit or abort");
        store_txn.commit();

        let accounts_snapshot_txn = inner
            .accounts_snapshot_txn
            .take()
            .expect("accounts snapshot staged once PROVE_BLOCKS is entered, released only by commit or abort");
        accounts_snapshot_txn.commit();

        let main_chain = inner.completed_main_chain.clone().expect("COMPLETE always sets completed_main_chain");
        let event = SyncEvent::Committed {
            proof: inner.current_proof.clone(),
            head_hash: inner.head_hash.clone(),
            main_chain,
        };
        self.notifier.read().notify(event);
        debug!("Sync committed");

        true
    }

    /// Discard everything this synchronizer has staged, from any phase.
    /// Idempotent.
    pub fn abort(&self) {
        let _guard = self.sync_lock.lock();
        let mut inner = self.inner.write();
        self.abort_locked(&mut inner);
    }

    fn abort_locked(&self, inner: &mut Inner<'env>) {
        if matches!(inner.phase, Phase::Aborted) {
            return;
        }

        if let Some(store_txn) = inner.store_txn.take() {
            store_txn.abort();
        }
        if let Some(accounts_snapshot_txn) = inner.accounts_snapshot_txn.take() {
            accounts_snapshot_txn.abort();
        }

        match std::mem::replace(&mut inner.phase, Phase::Aborted) {
            Phase::ProveAccountsTree { partial_tree } => partial_tree.abort(),
            Phase::ProveBlocks { accounts_tx, .. } => accounts_tx.abort(),
            _ => {}
        }

        debug!("Sync aborted");
        self.notifier.read().notify(SyncEvent::Aborted);
    }

    /// Chain Suffix Applier (spec.md §4.2). Truncates the store if the
    /// newly adopted prefix head isn't part of our current dense chain,
    /// plants the prefix as lookup-only history behind it, then replays the
    /// reconstructed suffix forward one light block at a time.
    fn apply_chain_suffix(&self, inner: &mut Inner<'env>, proof: ChainProof, reconstructed_suffix: Vec<Block>) {
        let prefix_head = proof.prefix.last().expect("verified proof has a non-empty prefix").clone();
        let prefix_head_hash = prefix_head.hash();

        let store_txn = inner.store_txn.as_mut().expect("store transaction alive until commit/abort");

        let needs_truncate = match self.chain_store.get_chain_info(&prefix_head_hash, false, Some(store_txn)) {
            Some(info) => !info.state.is_extendable(),
            None => true,
        };

        if needs_truncate {
            debug!("Prefix head {} is not part of our current dense chain - truncating the store", prefix_head_hash);
            self.chain_store.truncate(store_txn);

            let head_info = ChainInfo::initial(prefix_head.clone());
            self.chain_store.put_chain_info(store_txn, &prefix_head_hash, &head_info, true);
            self.chain_store.set_head(store_txn, &prefix_head_hash);

            for block in &proof.prefix[..proof.prefix.len() - 1] {
                let info = ChainInfo::lookup_only(block.clone());
                self.chain_store.put_chain_info(store_txn, &block.hash(), &info, true);
            }
        }

        let mut head_hash = prefix_head_hash;
        for block in reconstructed_suffix {
            self.push_light_block(inner, &mut head_hash, block);
        }
        inner.head_hash = head_hash;

        debug!("Proof accepted, transitioning to PROVE_ACCOUNTS_TREE");
        inner.current_proof = proof;
        inner.phase = Phase::ProveAccountsTree { partial_tree: PartialAccountsTree::new() };
    }

    /// Append one reconstructed suffix block (header + interlink only, no
    /// accounts delta) to the dense chain being assembled (spec.md §4.2.1).
    /// A verified proof's suffix always extends in a straight line, so this
    /// never needs to consider orphans or forks the way `Blockchain::push`
    /// does for arbitrary inbound blocks.
    fn push_light_block(&self, inner: &mut Inner<'env>, head_hash: &mut Blake2bHash, block: Block) {
        let hash = block.hash();

        let store_txn = inner.store_txn.as_mut().expect("store transaction alive until commit/abort");
        let prev_info = self
            .chain_store
            .get_chain_info(&block.header.prev_hash, false, Some(store_txn))
            .expect("a verified proof's suffix always chains from the prefix head or a prior suffix block");

        let mut chain_info = prev_info.next(block);
        chain_info.on_main_chain = true;

        self.chain_store.put_chain_info(store_txn, &hash, &chain_info, true);
        self.chain_store.set_head(store_txn, &hash);
        *head_hash = hash.clone();

        self.notifier.read().notify(SyncEvent::HeadChanged(hash));
    }

    fn verify_interlink(&self, block: &Block, successor: &Block) -> bool {
        let next_target = Target::from(successor.header.n_bits);
        block.get_next_interlink(&next_target).hash() == successor.header.interlink_hash
    }

    fn store_txn_ref<'a>(&self, inner: &'a Inner<'env>) -> Option<&'a Transaction<'env>> {
        inner.store_txn.as_deref()
    }

    /// Difficulty retargeting against this synchronizer's own chain store,
    /// identical to `Blockchain::get_next_target` except that it returns
    /// `None` (rather than panicking) when the blocks needed for the
    /// retargeting window aren't available yet - during `PROVE_BLOCKS` that
    /// history is still being walked backward and may simply not exist
    /// (spec.md §4.4 clause 5, "when determinable").
    fn get_next_target(&self, inner: &Inner<'env>, head_info: &ChainInfo) -> Option<Target> {
        let txn = self.store_txn_ref(inner);
        let tail_height = 1u32.max(head_info.head.header.height.saturating_sub(policy::DIFFICULTY_BLOCK_WINDOW));
        let tail_info = self.chain_store.get_chain_info_at(tail_height, false, txn)?;

        let head = &head_info.head.header;
        let tail = &tail_info.head.header;
        if head.height <= tail.height {
            return None;
        }

        let head_total_difficulty = head_info.state.total_difficulty()?.clone();
        let tail_total_difficulty = tail_info.state.total_difficulty()?.clone();
        let mut delta_total_difficulty = head_total_difficulty - tail_total_difficulty;
        let mut actual_time = head.timestamp.saturating_sub(tail.timestamp);

        if head.height <= policy::DIFFICULTY_BLOCK_WINDOW {
            actual_time += (policy::DIFFICULTY_BLOCK_WINDOW - head.height + 1) * policy::BLOCK_TIME;
            delta_total_difficulty += Difficulty::from(policy::DIFFICULTY_BLOCK_WINDOW - head.height + 1);
        }

        let expected_time = policy::DIFFICULTY_BLOCK_WINDOW * policy::BLOCK_TIME;
        let mut adjustment = actual_time as f64 / expected_time as f64;
        adjustment = adjustment.max(1f64 / policy::DIFFICULTY_MAX_ADJUSTMENT_FACTOR);
        adjustment = adjustment.min(policy::DIFFICULTY_MAX_ADJUSTMENT_FACTOR);

        let average_difficulty = delta_total_difficulty / Difficulty::from(policy::DIFFICULTY_BLOCK_WINDOW);
        let average_target = policy::BLOCK_TARGET_MAX_DECIMAL.clone() / average_difficulty;
        let mut next_target = average_target * Difficulty::from(adjustment);

        if next_target > *policy::BLOCK_TARGET_MAX_DECIMAL {
            next_target = policy::BLOCK_TARGET_MAX_DECIMAL.clone();
        }
        let min_target = Difficulty::from(1);
        if next_target < min_target {
            next_target = min_target;
        }

        let n_bits: TargetCompact = Target::from(next_target).into();
        Some(Target::from(n_bits))
    }
}

fn needs_more_blocks(initial_proof_head_height: u32, proof_head: &ChainInfo) -> bool {
    initial_proof_head_height.saturating_sub(proof_head.head.header.height) < policy::NUM_BLOCKS_VERIFICATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimiq_primitives::account::Account;
    use nimiq_primitives::block::{BlockBody, BlockHeader, Interlink};

    fn miner() -> nimiq_keys::Address {
        nimiq_keys::Address::from([9u8; 20])
    }

    fn empty_body() -> BlockBody {
        BlockBody {
            miner: miner(),
            extra_data: vec![],
            transactions: vec![],
            pruned_accounts: vec![],
        }
    }

    /// `accounts_hash` after the miner's (zero) reward has been credited
    /// once - constant across a whole chain of empty-body blocks sharing
    /// the same miner, which is exactly what these tests build.
    fn constant_accounts_hash(env: &Environment) -> Blake2bHash {
        let accounts = Accounts::new(env);
        let mut txn = WriteTransaction::new(env);
        accounts.init(&mut txn, NetworkId::Dev);
        accounts.commit_block(&mut txn, &block_with_body(1, Blake2bHash::default(), Interlink::default(), Default::default())).unwrap_err();
        let hash = accounts.hash(Some(&txn));
        txn.abort();
        hash
    }

    fn block_with_body(height: u32, prev_hash: Blake2bHash, interlink: Interlink, accounts_hash: Blake2bHash) -> Block {
        let body = empty_body();
        let mut nonce = 0u32;
        loop {
            let header = BlockHeader {
                version: 1,
                prev_hash: prev_hash.clone(),
                interlink_hash: interlink.hash(),
                body_hash: body.hash(),
                accounts_hash,
                n_bits: nimiq_primitives::block::TargetCompact::from_compact(0x2000_ffff),
                height,
                timestamp: height,
                nonce,
            };
            if header.verify_proof_of_work() {
                return Block {
                    header,
                    interlink: interlink.clone(),
                    body: Some(body),
                };
            }
            nonce += 1;
        }
    }

    fn degenerate_proof(genesis: &Block) -> ChainProof {
        ChainProof {
            prefix: vec![genesis.clone()],
            suffix: vec![],
        }
    }

    fn genesis_header_only() -> Block {
        let interlink = Interlink::default();
        let mut nonce = 0u32;
        loop {
            let header = BlockHeader {
                version: 1,
                prev_hash: Blake2bHash::default(),
                interlink_hash: interlink.hash(),
                body_hash: Blake2bHash::default(),
                accounts_hash: Blake2bHash::default(),
                n_bits: nimiq_primitives::block::TargetCompact::from_compact(0x2000_ffff),
                height: 1,
                timestamp: 1,
                nonce,
            };
            if header.verify_proof_of_work() {
                return Block { header, interlink, body: None };
            }
            nonce += 1;
        }
    }

    /// A `Blockchain` on an `Environment` of its own, just to give a test a
    /// forward-push delegate without entangling the synchronizer's own
    /// store/head bookkeeping with `Blockchain::new`'s genesis planting.
    fn unrelated_blockchain<'e>(env: &'e Environment) -> Blockchain<'e> {
        Blockchain::new(env, NetworkId::Dev, Arc::new(NetworkTime::new()))
    }

    #[test]
    fn it_rejects_operations_in_the_wrong_phase() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();
        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&genesis), &blockchain);

        assert_eq!(sync.push_accounts_tree_chunk(AccountsTreeChunk::new(vec![], true)), ChunkPushResult::IncorrectProof);
        assert_eq!(sync.push_block(genesis.clone()), PushResult::IncorrectProof);
        assert!(!sync.commit());
        assert_eq!(sync.state(), SyncState::ProveChain);
    }

    #[test]
    fn it_rejects_a_structurally_invalid_proof_without_changing_phase() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();
        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&genesis), &blockchain);

        // Suffix length matches neither K nor head_height - 1 (genesis
        // height 1, suffix length 5 => head_height 6, alt length 5... pick
        // a genesis height that breaks both: reuse height-3 prefix head.
        let prefix_head = block_with_body(3, Blake2bHash::default(), Interlink::default(), Blake2bHash::default());
        let mut header_only = prefix_head.clone();
        header_only.body = None;
        let bad_proof = ChainProof {
            prefix: vec![header_only],
            suffix: vec![BlockHeader {
                version: 1,
                prev_hash: prefix_head.hash(),
                interlink_hash: Interlink::default().hash(),
                body_hash: Blake2bHash::default(),
                accounts_hash: Blake2bHash::default(),
                n_bits: nimiq_primitives::block::TargetCompact::from_compact(0x2000_ffff),
                height: 4,
                timestamp: 4,
                nonce: 0,
            }],
        };

        assert!(!sync.push_proof(bad_proof));
        assert_eq!(sync.state(), SyncState::ProveChain);
    }

    #[test]
    fn it_aborts_when_a_worse_proof_is_pushed() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();

        // A "current" proof that is trivially better: same prefix, so same
        // score, but with more suffix difficulty than the incoming one.
        let easy_successor = block_with_body(2, genesis.hash(), Interlink::default(), Blake2bHash::default());
        let mut hard_header = easy_successor.header.clone();
        hard_header.n_bits = nimiq_primitives::block::TargetCompact::from_compact(0x1f01_0000);

        let current = ChainProof {
            prefix: vec![genesis.clone()],
            suffix: vec![hard_header],
        };
        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), current, &blockchain);

        let weaker = ChainProof {
            prefix: vec![genesis],
            suffix: vec![easy_successor.header],
        };

        assert!(sync.push_proof(weaker));
        assert_eq!(sync.state(), SyncState::Aborted);
    }

    #[test]
    fn it_adopts_a_single_block_proof_and_attaches_the_head_block_body() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();
        let accounts_hash = constant_accounts_hash(&env);

        let interlink = genesis.get_next_interlink(&Target::from(genesis.header.n_bits));
        let head = block_with_body(2, genesis.hash(), interlink, accounts_hash);

        // A single-block suffix (length 1 == head_height - 1) lets the
        // proof head's predecessor be the genesis itself, so the
        // difficulty retarget against the `DIFFICULTY_BLOCK_WINDOW` falls
        // into its own "head at or before the window tail" early-out
        // (spec.md §4.4 clause 5) - no need to replicate the retargeting
        // arithmetic by hand to keep this test self-consistent.
        let proof = ChainProof {
            prefix: vec![genesis.clone()],
            suffix: vec![head.header.clone()],
        };

        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&genesis), &blockchain);
        assert!(sync.push_proof(proof));
        assert_eq!(sync.state(), SyncState::ProveAccountsTree);
        assert_eq!(sync.get_missing_accounts_prefix(), Some(nimiq_keys::Address::from([0u8; 20]).to_string()));

        let chunk = AccountsTreeChunk::new(vec![(miner(), Account { balance: 0 })], true);
        assert_eq!(sync.push_accounts_tree_chunk(chunk), ChunkPushResult::Complete);
        assert_eq!(sync.state(), SyncState::ProveBlocks);
        assert_eq!(sync.proof_head_height(), Some(2));
        assert!(sync.needs_more_blocks());

        assert_eq!(sync.push_block(head), PushResult::Extended);
        assert_eq!(sync.proof_head_height(), Some(2));
    }

    /// Build a synchronizer already sitting in `PROVE_BLOCKS`, with
    /// `proof_head` at `block_b` (height 2), its verification-only accounts
    /// transaction already seeded with the snapshot, and the snapshot
    /// separately staged into `accounts_snapshot_txn` - exactly the state
    /// `push_accounts_tree_chunk` would leave behind, minus needing to walk
    /// the whole state machine there. `initial_proof_head_height` is set so
    /// a single backward step reaches `NUM_BLOCKS_VERIFICATION`, without
    /// mining that many real blocks. `blockchain` must outlive `'env` and is
    /// passed in by the caller so its own `bc_env` stays alive alongside it.
    fn make_prove_blocks_fixture<'env>(
        env: &'env Environment,
        blockchain: &'env Blockchain<'env>,
        block_a_accounts_hash: Blake2bHash,
    ) -> (PartialLightChainSynchronizer<'env>, Block, Block) {
        let accounts_hash = constant_accounts_hash(env);
        let block_a = block_with_body(1, Blake2bHash::default(), Interlink::default(), block_a_accounts_hash);
        let interlink_b = block_a.get_next_interlink(&Target::from(block_a.header.n_bits));
        let block_b = block_with_body(2, block_a.hash(), interlink_b, accounts_hash);

        let sync = PartialLightChainSynchronizer::new(env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&block_b), blockchain);

        let mut tree = PartialAccountsTree::new();
        tree.push_chunk(AccountsTreeChunk::new(vec![(miner(), Account { balance: 0 })], true)).unwrap();

        let mut accounts_tx = sync.accounts.transaction();
        accounts_tx.commit_partial_tree(&tree);
        let accounts_snapshot_txn = sync.accounts.stage_partial_tree(&tree);

        let proof_head = ChainInfo::initial(block_b.clone());

        let mut inner = sync.inner.write();
        inner.phase = Phase::ProveBlocks { accounts_tx, proof_head };
        inner.accounts_snapshot_txn = Some(accounts_snapshot_txn);
        inner.head_hash = block_b.hash();
        inner.initial_proof_head_height = block_b.header.height - 1 + policy::NUM_BLOCKS_VERIFICATION;
        drop(inner);

        (sync, block_a, block_b)
    }

    #[test]
    fn it_prepends_a_block_and_completes_once_verification_reaches_its_target() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let accounts_hash = constant_accounts_hash(&env);
        let (sync, block_a, _block_b) = make_prove_blocks_fixture(&env, &blockchain, accounts_hash);

        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = completed.clone();
        sync.notifier.write().register(move |event| {
            if let SyncEvent::Complete { .. } = event {
                completed_clone.store(true, Ordering::SeqCst);
            }
        });

        assert!(sync.needs_more_blocks());
        assert_eq!(sync.push_block(block_a), PushResult::Extended);

        assert_eq!(sync.state(), SyncState::Complete);
        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(sync.proof_head_height(), None);

        assert!(sync.commit());
    }

    #[test]
    fn it_rejects_a_prepended_block_with_a_mismatched_accounts_hash() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let (sync, block_a, _block_b) = make_prove_blocks_fixture(&env, &blockchain, nimiq_hash::Blake2bHasher::digest(b"wrong"));

        assert_eq!(sync.push_block(block_a), PushResult::Invalid);
        assert_eq!(sync.proof_head_height(), Some(2));
        assert_eq!(sync.state(), SyncState::ProveBlocks);
    }

    #[test]
    fn it_rejects_a_repeated_backward_block_as_an_orphan() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let accounts_hash = constant_accounts_hash(&env);
        let (sync, block_a, _block_b) = make_prove_blocks_fixture(&env, &blockchain, accounts_hash);

        // Keep `initial_proof_head_height` well within `NUM_BLOCKS_VERIFICATION`
        // of the post-prepend height, so one prepend does not already
        // satisfy `needsMoreBlocks` - the phase must stay `PROVE_BLOCKS`
        // (not short-circuit via the `Complete` phase check) when the
        // repeat push below is attempted.
        sync.inner.write().initial_proof_head_height = block_a.header.height + 10;

        assert_eq!(sync.push_block(block_a.clone()), PushResult::Extended);
        assert_eq!(sync.state(), SyncState::ProveBlocks);
        assert_eq!(sync.proof_head_height(), Some(block_a.header.height));

        // Re-pushing the same predecessor: its hash no longer matches
        // `proofHead.prevHash` (the proof head moved past it), and it no
        // longer qualifies for the head-attach path either (the head
        // already carries a body) - an orphan either way (spec.md §8
        // property 6).
        assert_eq!(sync.push_block(block_a), PushResult::Orphan);
    }

    /// `accounts_hash` for a table carrying the miner's zero reward entry
    /// plus one extra, untouched address - the blocks these tests mine
    /// never carry transactions, so an address besides the miner keeps
    /// whatever balance the synced snapshot gave it across every forward
    /// and backward step.
    fn accounts_hash_with_extra(env: &Environment, extra: nimiq_keys::Address, balance: u64) -> Blake2bHash {
        let accounts = Accounts::new(env);
        let mut txn = WriteTransaction::new(env);
        accounts.init(&mut txn, NetworkId::Dev);
        accounts
            .commit_block(&mut txn, &block_with_body(1, Blake2bHash::default(), Interlink::default(), Default::default()))
            .unwrap_err();
        txn.put(&accounts.db(), &extra, &Account { balance });
        let hash = accounts.hash(Some(&txn));
        txn.abort();
        hash
    }

    #[test]
    fn it_persists_the_synced_accounts_snapshot_after_commit() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);

        let synced_address = nimiq_keys::Address::from([7u8; 20]);
        let synced_balance = 42u64;
        let accounts_hash = accounts_hash_with_extra(&env, synced_address, synced_balance);

        let block_a = block_with_body(1, Blake2bHash::default(), Interlink::default(), accounts_hash);
        let interlink_b = block_a.get_next_interlink(&Target::from(block_a.header.n_bits));
        let block_b = block_with_body(2, block_a.hash(), interlink_b, accounts_hash);

        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&block_b), &blockchain);

        let mut tree = PartialAccountsTree::new();
        tree.push_chunk(AccountsTreeChunk::new(
            vec![(synced_address, Account { balance: synced_balance }), (miner(), Account { balance: 0 })],
            true,
        ))
        .unwrap();

        let mut accounts_tx = sync.accounts.transaction();
        accounts_tx.commit_partial_tree(&tree);
        let accounts_snapshot_txn = sync.accounts.stage_partial_tree(&tree);

        let proof_head = ChainInfo::initial(block_b.clone());
        {
            let mut inner = sync.inner.write();
            inner.phase = Phase::ProveBlocks { accounts_tx, proof_head };
            inner.accounts_snapshot_txn = Some(accounts_snapshot_txn);
            inner.head_hash = block_b.hash();
            inner.initial_proof_head_height = block_b.header.height - 1 + policy::NUM_BLOCKS_VERIFICATION;
        }

        assert_eq!(sync.push_block(block_a), PushResult::Extended);
        assert_eq!(sync.state(), SyncState::Complete);
        assert!(sync.commit());

        // The regression this guards against: `commit()` used to only
        // commit `store_txn`, so the synced snapshot never reached the
        // canonical `Accounts` table and `get` would still return the
        // zero default here.
        let committed_accounts = Accounts::new(&env);
        assert_eq!(committed_accounts.get(&synced_address, None).balance, synced_balance);
    }

    #[test]
    #[should_panic(expected = "Block body expected")]
    fn it_delegates_forward_pushes_to_the_base_chain_once_complete() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();
        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&genesis), &blockchain);

        sync.inner.write().phase = Phase::Complete;

        // `Blockchain::push` asserts its argument carries a body before
        // doing anything else. A header-only block reaching that assert is
        // proof this call actually went through `blockchain.push` - the old
        // behavior returned `PushResult::Orphan` unconditionally here and
        // never touched `blockchain` at all.
        sync.push_block(genesis);
    }

    #[test]
    fn abort_is_idempotent_and_legal_from_any_phase() {
        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();
        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&genesis), &blockchain);

        sync.abort();
        assert_eq!(sync.state(), SyncState::Aborted);
        sync.abort();
        assert_eq!(sync.state(), SyncState::Aborted);
    }

    #[test]
    fn it_notifies_registered_listeners_on_abort() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let env = Environment::new();
        let bc_env = Environment::new();
        let blockchain = unrelated_blockchain(&bc_env);
        let genesis = genesis_header_only();
        let sync = PartialLightChainSynchronizer::new(&env, NetworkId::Dev, Arc::new(NetworkTime::new()), degenerate_proof(&genesis), &blockchain);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        sync.notifier.write().register(move |event| {
            if let SyncEvent::Aborted = event {
                fired_clone.store(true, Ordering::SeqCst);
            }
        });

        sync.abort();
        assert!(fired.load(Ordering::SeqCst));
    }
}
