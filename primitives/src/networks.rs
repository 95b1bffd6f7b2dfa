use nimiq_hash::Blake2bHash;

use crate::block::{Block, BlockHeader, Interlink, TargetCompact};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkId {
    Main = 1,
    Test = 2,
    Dev = 3,
}

pub struct NetworkInfo {
    pub network_id: NetworkId,
    pub genesis_block: Block,
    pub genesis_hash: Blake2bHash,
}

fn genesis_for(network_id: NetworkId) -> NetworkInfo {
    let header = BlockHeader {
        version: 1,
        prev_hash: Blake2bHash::default(),
        interlink_hash: Blake2bHash::default(),
        body_hash: Blake2bHash::default(),
        accounts_hash: Blake2bHash::default(),
        n_bits: TargetCompact::from_compact(0x1f01_0000),
        height: 1,
        timestamp: 0,
        nonce: network_id as u32,
    };
    let genesis_block = Block {
        header,
        interlink: Interlink::default(),
        body: None,
    };
    let genesis_hash = nimiq_hash::Hash::hash(&genesis_block.header);
    NetworkInfo {
        network_id,
        genesis_block,
        genesis_hash,
    }
}

pub fn get_network_info(network_id: NetworkId) -> Option<NetworkInfo> {
    Some(genesis_for(network_id))
}
