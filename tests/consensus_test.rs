//! Tests that run whole networks of nodes, each with a running engine and a block producer, and
//! watch their chains grow.

use std::{
    collections::HashMap,
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use log::LevelFilter;
use sport_bft::{
    chain::ChainReader,
    config::Configuration,
    types::{
        block::Proposal, crypto_primitives::Keypair, data_types::Address, extra,
        validator_set::ProposerPolicy,
    },
};

mod common;

use crate::common::{
    fixtures::{addresses, genesis_header, sorted_keypairs},
    logging::setup_logger,
    network::{mock_network, NetworkStub},
    node::Node,
};

/// Give up on a network that has not made the expected progress after this long.
const DEADLINE: Duration = Duration::from_secs(120);

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn configuration(request_timeout: Duration) -> Configuration {
    Configuration::builder()
        .request_timeout(request_timeout)
        .max_timeout(Duration::from_secs(10))
        .block_period(1)
        .proposer_policy(ProposerPolicy::RoundRobin)
        .build()
}

/// Start a node for each keypair in `running`, on a network shared by every address in `peers`, from
/// a genesis block listing `validators`.
fn start_nodes(
    validators: &[Address],
    peers: &[Address],
    running: Vec<Keypair>,
    configuration: Configuration,
) -> Vec<Node> {
    let genesis = genesis_header(validators, now());
    let mut network_stubs: HashMap<Address, NetworkStub> = peers
        .iter()
        .copied()
        .zip(mock_network(peers.iter().copied()))
        .collect();
    running
        .into_iter()
        .map(|keypair| {
            let network = network_stubs.remove(&keypair.address()).unwrap();
            Node::new(keypair, network, genesis.clone(), configuration.clone())
        })
        .collect()
}

fn wait_until(description: &str, condition: impl Fn() -> bool) {
    log::debug!("Waiting until {}.", description);
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < DEADLINE,
            "timed out waiting until {}",
            description
        );
        thread::sleep(Duration::from_millis(200));
    }
}

/// Check that every node has the same blocks up to `height`, and that each of them carries a valid
/// seal and enough committed seals.
fn assert_consistent(nodes: &[Node], height: u64) {
    for number in 1..=height {
        let block = nodes[0].chain().block(number).unwrap();
        for node in &nodes[1..] {
            assert_eq!(node.chain().block(number).unwrap().hash(), block.hash());
        }
        nodes[0].backend().verify_header(block.header()).unwrap();
        assert!(!extra::extract(block.header()).unwrap().committed_seal.is_empty());
    }
}

#[test]
fn single_node_consensus_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a network with a single validator.
    let keypairs = sorted_keypairs(1);
    let members = addresses(&keypairs);
    let nodes = start_nodes(
        &members,
        &members,
        keypairs,
        configuration(Duration::from_millis(2000)),
    );

    // 2. The validator decides blocks on its own.
    wait_until("the validator reaches height 3", || nodes[0].height() >= 3);
    assert_consistent(&nodes, 3);

    // 3. Every block was sealed by the validator, in increasing timestamp order.
    let mut last_time = 0;
    for number in 1..=3 {
        let header = nodes[0].chain().block(number).unwrap().header().clone();
        assert_eq!(nodes[0].backend().author(&header).unwrap(), nodes[0].address());
        assert!(header.time > last_time);
        last_time = header.time;
    }
}

#[test]
fn four_nodes_consensus_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start 4 validators.
    let keypairs = sorted_keypairs(4);
    let members = addresses(&keypairs);
    let nodes = start_nodes(
        &members,
        &members,
        keypairs,
        configuration(Duration::from_millis(3000)),
    );

    // 2. Poll every node until all of them have decided 3 blocks.
    wait_until("every node reaches height 3", || {
        nodes.iter().all(|node| node.height() >= 3)
    });

    // 3. They decided the same blocks, each committed by a quorum.
    assert_consistent(&nodes, 3);
    for number in 1..=3 {
        let header = nodes[0].chain().block(number).unwrap().header().clone();
        let seals = extra::extract(&header).unwrap().committed_seal;
        assert!(seals.len() >= 3);
    }
}

#[test]
fn absent_validator_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Four validators in the genesis block, but only three of them running. With f = 1 the
    //    remaining three are still a quorum.
    let mut keypairs = sorted_keypairs(4);
    let members = addresses(&keypairs);
    let absent = keypairs.remove(3);
    let nodes = start_nodes(
        &members,
        &members,
        keypairs,
        configuration(Duration::from_millis(1000)),
    );

    // 2. Whenever the absent validator is due to propose, the others change round and carry on.
    wait_until("every running node reaches height 4", || {
        nodes.iter().all(|node| node.height() >= 4)
    });
    assert_consistent(&nodes, 4);

    // 3. The absent validator authored none of the blocks.
    for number in 1..=4 {
        let header = nodes[0].chain().block(number).unwrap().header().clone();
        assert_ne!(
            nodes[0].backend().author(&header).unwrap(),
            absent.address()
        );
    }
}

#[test]
fn validator_voting_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start 4 validators. A fifth account is known to the network but does not run a node.
    let mut keypairs = sorted_keypairs(5);
    let newcomer = keypairs.remove(4);
    let validators = addresses(&keypairs);
    let mut peers = validators.clone();
    peers.push(newcomer.address());
    let nodes = start_nodes(
        &validators,
        &peers,
        keypairs,
        configuration(Duration::from_millis(1000)),
    );

    // 2. Every validator votes to authorize the newcomer in the blocks it produces.
    for node in &nodes {
        node.backend().propose(newcomer.address(), true);
    }

    // 3. Poll until the votes of a majority have been included and the newcomer is a validator.
    wait_until("the newcomer is a validator on every node", || {
        nodes.iter().all(|node| {
            node.backend()
                .get_validators(None)
                .map(|validators| validators.contains(&newcomer.address()))
                .unwrap_or(false)
        })
    });

    // 4. With 5 validators a quorum is 4, so the 4 running validators carry on without the newcomer.
    let height = nodes.iter().map(|node| node.height()).min().unwrap();
    wait_until("every node decides 2 more blocks", || {
        nodes.iter().all(|node| node.height() >= height + 2)
    });
    assert_consistent(&nodes, height + 2);
    let header = nodes[0]
        .chain()
        .get_header_by_number(height + 2)
        .unwrap();
    let listed = extra::extract(&header).unwrap().validators;
    assert_eq!(listed.len(), 5);
    assert!(listed.contains(&newcomer.address()));
}
