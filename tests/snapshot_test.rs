//! Tests for validator set voting: replaying headers onto snapshots, and resolving snapshots through
//! the in-memory cache and key-value store checkpoints.

mod common;

use std::collections::HashMap;

use common::{
    fixtures::{genesis_header, named_keypair, sealed_child},
    mem_chain::MemChain,
    mem_db::MemDB,
};
use sport_bft::{
    chain::ChainReader,
    snapshot::{
        pluggables::KVGet, resolver::SnapshotStore, Snapshot, SnapshotError, CHECKPOINT_INTERVAL,
    },
    types::{
        block::Header,
        crypto_primitives::Keypair,
        data_types::{Address, Nonce},
        validator_set::{ProposerPolicy, ValidatorSet},
    },
};

/// A header in a voting scenario: who sealed it, and the vote it carries if any.
struct TesterVote {
    signer: &'static str,
    vote: Option<(&'static str, bool)>,
}

fn sign(signer: &'static str) -> TesterVote {
    TesterVote { signer, vote: None }
}

fn vote(signer: &'static str, voted: &'static str, authorize: bool) -> TesterVote {
    TesterVote {
        signer,
        vote: Some((voted, authorize)),
    }
}

/// Named accounts, so that scenarios can be written in terms of "A", "B", ...
struct Accounts(HashMap<&'static str, Keypair>);

impl Accounts {
    fn new() -> Accounts {
        Accounts(HashMap::new())
    }

    fn keypair(&mut self, name: &'static str) -> Keypair {
        self.0
            .entry(name)
            .or_insert_with(|| named_keypair(name))
            .clone()
    }

    fn address(&mut self, name: &'static str) -> Address {
        self.keypair(name).address()
    }

    fn addresses(&mut self, names: &[&'static str]) -> Vec<Address> {
        let mut addresses: Vec<Address> = names.iter().map(|name| self.address(name)).collect();
        addresses.sort();
        addresses
    }
}

/// Build the genesis header for `validators` and the chain of headers carrying `votes` on top of it.
fn voting_chain(
    accounts: &mut Accounts,
    validators: &[&'static str],
    votes: &[TesterVote],
) -> (Header, Vec<Header>) {
    let validator_addresses = accounts.addresses(validators);
    let genesis = genesis_header(&validator_addresses, 0);

    let mut headers: Vec<Header> = Vec::new();
    for tester_vote in votes {
        let parent = headers.last().unwrap_or(&genesis).clone();
        let signer = accounts.keypair(tester_vote.signer);
        let vote = tester_vote
            .vote
            .map(|(voted, authorize)| (accounts.address(voted), authorize));
        headers.push(sealed_child(&parent, &signer, &validator_addresses, vote));
    }
    (genesis, headers)
}

fn genesis_snapshot(accounts: &mut Accounts, validators: &[&'static str], genesis: &Header, epoch: u64) -> Snapshot {
    Snapshot::new(
        epoch,
        0,
        genesis.hash(),
        ValidatorSet::new(&accounts.addresses(validators), ProposerPolicy::RoundRobin),
    )
}

#[test]
fn voting_test() {
    struct Case {
        name: &'static str,
        validators: Vec<&'static str>,
        votes: Vec<TesterVote>,
        results: Vec<&'static str>,
    }

    let cases = vec![
        Case {
            name: "single validator, no votes cast",
            validators: vec!["A"],
            votes: vec![sign("A")],
            results: vec!["A"],
        },
        Case {
            name: "single validator, voting to add two others (only accept first, second needs 2 votes)",
            validators: vec!["A"],
            votes: vec![vote("A", "B", true), sign("B"), vote("A", "C", true)],
            results: vec!["A", "B"],
        },
        Case {
            name: "two validators, voting to add three others (only accept first two, third needs 3 votes)",
            validators: vec!["A", "B"],
            votes: vec![
                vote("A", "C", true),
                vote("B", "C", true),
                vote("A", "D", true),
                vote("B", "D", true),
                sign("C"),
                vote("A", "E", true),
                vote("B", "E", true),
            ],
            results: vec!["A", "B", "C", "D"],
        },
        Case {
            name: "single validator, dropping itself",
            validators: vec!["A"],
            votes: vec![vote("A", "A", false)],
            results: vec![],
        },
        Case {
            name: "two validators, mutual consent needed to drop either (not fulfilled)",
            validators: vec!["A", "B"],
            votes: vec![vote("A", "B", false)],
            results: vec!["A", "B"],
        },
        Case {
            name: "two validators, mutual consent needed to drop either (fulfilled)",
            validators: vec!["A", "B"],
            votes: vec![vote("A", "B", false), vote("B", "B", false)],
            results: vec!["A"],
        },
        Case {
            name: "three validators able to drop a fourth",
            validators: vec!["A", "B", "C", "D"],
            votes: vec![vote("A", "D", false), vote("B", "D", false), vote("C", "D", false)],
            results: vec!["A", "B", "C"],
        },
        Case {
            name: "authorizations are counted once per validator per target",
            validators: vec!["A", "B"],
            votes: vec![
                vote("A", "C", true),
                sign("B"),
                vote("A", "C", true),
                sign("B"),
                vote("A", "C", true),
            ],
            results: vec!["A", "B"],
        },
        Case {
            name: "authorizing multiple accounts concurrently is permitted",
            validators: vec!["A", "B"],
            votes: vec![
                vote("A", "C", true),
                sign("B"),
                vote("A", "D", true),
                sign("B"),
                sign("A"),
                vote("B", "D", true),
                sign("A"),
                vote("B", "C", true),
            ],
            results: vec!["A", "B", "C", "D"],
        },
        Case {
            name: "changes reaching consensus out of bounds (via a deauth) execute on touch",
            validators: vec!["A", "B", "C", "D"],
            votes: vec![
                vote("A", "C", false),
                sign("B"),
                sign("C"),
                vote("A", "D", false),
                vote("B", "C", false),
                sign("C"),
                sign("A"),
                vote("B", "D", false),
                vote("C", "D", false),
                sign("A"),
                vote("C", "C", true),
            ],
            results: vec!["A", "B"],
        },
        Case {
            name: "changes reaching consensus out of bounds (via a deauth) may go out of consensus on first touch",
            validators: vec!["A", "B", "C", "D"],
            votes: vec![
                vote("A", "C", false),
                sign("B"),
                sign("C"),
                vote("A", "D", false),
                vote("B", "C", false),
                sign("C"),
                sign("A"),
                vote("B", "D", false),
                vote("C", "D", false),
                sign("A"),
                vote("B", "C", true),
            ],
            results: vec!["A", "B", "C"],
        },
        Case {
            name: "pending votes do not survive authorization status changes",
            validators: vec!["A", "B", "C", "D", "E"],
            votes: vec![
                vote("A", "F", true),
                vote("B", "F", true),
                vote("C", "F", true),
                vote("D", "F", false),
                vote("E", "F", false),
                vote("B", "F", false),
                vote("C", "F", false),
                vote("D", "F", true),
                vote("E", "F", true),
                vote("B", "A", false),
                vote("C", "A", false),
                vote("D", "A", false),
                vote("B", "F", true),
            ],
            results: vec!["B", "C", "D", "E", "F"],
        },
    ];

    for case in cases {
        let mut accounts = Accounts::new();
        let (genesis, headers) = voting_chain(&mut accounts, &case.validators, &case.votes);
        let snapshot = genesis_snapshot(&mut accounts, &case.validators, &genesis, 30_000)
            .apply(&headers)
            .unwrap_or_else(|err| panic!("{}: failed to apply headers: {:?}", case.name, err));

        assert_eq!(
            snapshot.validators(),
            accounts.addresses(&case.results),
            "{}",
            case.name
        );
        assert_eq!(snapshot.number, headers.len() as u64, "{}", case.name);
        assert_eq!(snapshot.hash, headers.last().unwrap().hash(), "{}", case.name);

        // Every standing vote was cast by a current validator.
        for vote in &snapshot.votes {
            assert!(
                snapshot.validator_set.contains(&vote.validator),
                "{}: stale vote {:?}",
                case.name,
                vote
            );
        }
    }
}

#[test]
fn epoch_resets_votes_test() {
    let validators = ["A", "B"];
    let votes = [vote("A", "C", true), sign("B"), vote("B", "C", true)];

    // 1. Without an epoch boundary, the two votes add C.
    let mut accounts = Accounts::new();
    let (genesis, headers) = voting_chain(&mut accounts, &validators, &votes);
    let snapshot = genesis_snapshot(&mut accounts, &validators, &genesis, 30_000)
        .apply(&headers)
        .unwrap();
    assert_eq!(snapshot.validators(), accounts.addresses(&["A", "B", "C"]));

    // 2. With an epoch of 3, A's vote is discarded at block 3 before B's vote is counted.
    let snapshot = genesis_snapshot(&mut accounts, &validators, &genesis, 3)
        .apply(&headers)
        .unwrap();
    assert_eq!(snapshot.validators(), accounts.addresses(&["A", "B"]));
    assert_eq!(snapshot.votes.len(), 1);
    assert_eq!(snapshot.votes[0].validator, accounts.address("B"));
    assert_eq!(snapshot.tally[&accounts.address("C")].votes, 1);
}

#[test]
fn apply_composes_test() {
    let validators = ["A", "B", "C"];
    let votes = [
        vote("A", "D", true),
        vote("B", "D", true),
        sign("C"),
        vote("A", "C", false),
        vote("D", "C", false),
        vote("B", "C", false),
        sign("D"),
    ];
    let mut accounts = Accounts::new();
    let (genesis, headers) = voting_chain(&mut accounts, &validators, &votes);
    let base = genesis_snapshot(&mut accounts, &validators, &genesis, 30_000);

    // Replaying in two batches gives the same snapshot as replaying all at once.
    let all_at_once = base.apply(&headers).unwrap();
    let in_two_steps = base
        .apply(&headers[..3])
        .unwrap()
        .apply(&headers[3..])
        .unwrap();
    assert_eq!(all_at_once, in_two_steps);
    assert_eq!(all_at_once.validators(), accounts.addresses(&["A", "B", "D"]));

    // Replaying nothing changes nothing.
    assert_eq!(base.apply(&[]).unwrap(), base);
}

#[test]
fn apply_rejects_invalid_chains_test() {
    let validators = ["A", "B"];
    let mut accounts = Accounts::new();
    let (genesis, headers) = voting_chain(&mut accounts, &validators, &[sign("A"), sign("B"), sign("A")]);
    let base = genesis_snapshot(&mut accounts, &validators, &genesis, 30_000);

    // 1. A gap.
    let gapped = vec![headers[0].clone(), headers[2].clone()];
    assert!(matches!(base.apply(&gapped), Err(SnapshotError::InvalidVotingChain)));

    // 2. Not starting right after the snapshot.
    assert!(matches!(base.apply(&headers[1..]), Err(SnapshotError::InvalidVotingChain)));

    // 3. Sealed by an outsider.
    let mallory = accounts.keypair("M");
    let outsider = sealed_child(&genesis, &mallory, &accounts.addresses(&validators), None);
    assert!(matches!(
        base.apply(&[outsider]),
        Err(SnapshotError::Unauthorized(address)) if address == mallory.address()
    ));

    // 4. A nonce that is neither vote.
    let mut bad_nonce = headers[0].clone();
    bad_nonce.nonce = Nonce::new([1, 2, 3, 4, 5, 6, 7, 8]);
    common::fixtures::seal(&mut bad_nonce, &accounts.keypair("A"));
    assert!(matches!(base.apply(&[bad_nonce]), Err(SnapshotError::InvalidVote)));
}

#[test]
fn check_vote_test() {
    let mut accounts = Accounts::new();
    let validators = ["A", "B"];
    let (genesis, _) = voting_chain(&mut accounts, &validators, &[]);
    let snapshot = genesis_snapshot(&mut accounts, &validators, &genesis, 30_000);

    assert!(snapshot.check_vote(&accounts.address("C"), true));
    assert!(!snapshot.check_vote(&accounts.address("C"), false));
    assert!(snapshot.check_vote(&accounts.address("A"), false));
    assert!(!snapshot.check_vote(&accounts.address("A"), true));
}

#[test]
fn snapshot_json_test() {
    let mut accounts = Accounts::new();
    let validators = ["A", "B", "C"];
    let (genesis, headers) = voting_chain(&mut accounts, &validators, &[vote("A", "D", true), sign("B")]);
    let snapshot = genesis_snapshot(&mut accounts, &validators, &genesis, 30_000)
        .apply(&headers)
        .unwrap();

    let json = serde_json::to_value(&snapshot).unwrap();
    assert!(json.get("validators").is_some());
    assert_eq!(json["policy"], "RoundRobin");
    assert_eq!(json["votes"].as_array().unwrap().len(), 1);

    let decoded: Snapshot = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, snapshot);
}

#[test]
fn snapshot_store_test() {
    // 1. A chain of 3 validators where A votes D in, and B seconds it at block 2.
    let mut accounts = Accounts::new();
    let validators = ["A", "B", "C"];
    let votes = [vote("A", "D", true), vote("B", "D", true), sign("C")];
    let (genesis, headers) = voting_chain(&mut accounts, &validators, &votes);
    let chain = MemChain::new(genesis.clone());
    for header in &headers {
        assert!(chain.push_header(header.clone()));
    }
    let kv_store = MemDB::new();
    let store = SnapshotStore::new(kv_store.clone(), 30_000, ProposerPolicy::RoundRobin, None);

    // 2. The genesis snapshot comes from the genesis extra-data, and is persisted.
    let at_genesis = store.snapshot(&chain, 0, genesis.hash(), &[]).unwrap();
    assert_eq!(at_genesis.validators(), accounts.addresses(&validators));
    assert_eq!(kv_store.len(), 1);
    assert_eq!(kv_store.snapshot(&genesis.hash(), 30_000).unwrap(), Some(at_genesis.clone()));

    // 3. Later snapshots replay the chain.
    let at_one = store.snapshot(&chain, 1, headers[0].hash(), &[]).unwrap();
    assert_eq!(at_one.validators(), accounts.addresses(&validators));
    let at_head = store.snapshot(&chain, 3, headers[2].hash(), &[]).unwrap();
    assert_eq!(at_head.validators(), accounts.addresses(&["A", "B", "C", "D"]));

    // 4. A header not yet in the chain can be passed in as a parent.
    let pending = sealed_child(&headers[2], &accounts.keypair("D"), &accounts.addresses(&["A", "B", "C", "D"]), None);
    let at_pending = store
        .snapshot(&chain, 4, pending.hash(), &[pending.clone()])
        .unwrap();
    assert_eq!(at_pending.number, 4);
    assert_eq!(at_pending.hash, pending.hash());

    // 5. Without it, the block is unknown.
    let orphan = sealed_child(&pending, &accounts.keypair("A"), &accounts.addresses(&["A", "B", "C", "D"]), None);
    assert!(matches!(
        store.snapshot(&chain, 5, orphan.hash(), &[]),
        Err(SnapshotError::UnknownAncestor)
    ));

    // 6. Only genesis was checkpointed so far.
    assert_eq!(kv_store.len(), 1);
}

#[test]
fn snapshot_checkpoint_test() {
    // 1. Build a chain one checkpoint interval long, sealed in turn by A and B.
    let mut accounts = Accounts::new();
    let validators = ["A", "B"];
    let votes: Vec<TesterVote> = (0..CHECKPOINT_INTERVAL)
        .map(|i| if i % 2 == 0 { sign("A") } else { sign("B") })
        .collect();
    let (genesis, headers) = voting_chain(&mut accounts, &validators, &votes);
    let chain = MemChain::new(genesis);
    for header in &headers {
        assert!(chain.push_header(header.clone()));
    }
    let kv_store = MemDB::new();
    let store = SnapshotStore::new(kv_store.clone(), 30_000, ProposerPolicy::RoundRobin, None);

    // 2. Resolving the snapshot at the interval stores it alongside genesis.
    let head = chain.current_block().header().clone();
    assert_eq!(head.number, CHECKPOINT_INTERVAL);
    let snapshot = store.snapshot(&chain, head.number, head.hash(), &[]).unwrap();
    assert_eq!(kv_store.len(), 2);

    // 3. The checkpoint loads back with the configured epoch.
    let loaded = kv_store.snapshot(&head.hash(), 100).unwrap().unwrap();
    assert_eq!(loaded.epoch, 100);
    assert_eq!(loaded.validators(), snapshot.validators());
    assert_eq!(loaded.number, CHECKPOINT_INTERVAL);

    // 4. A fresh store finds the checkpoint instead of replaying from genesis.
    let fresh = SnapshotStore::new(kv_store, 30_000, ProposerPolicy::RoundRobin, None);
    assert_eq!(
        fresh.snapshot(&chain, head.number, head.hash(), &[]).unwrap(),
        snapshot
    );
}
