//! Keys, headers and blocks for tests.

use k256::ecdsa::SigningKey;
use sport_bft::types::{
    block::{empty_uncle_hash, transactions_hash, Block, Header},
    crypto_primitives::{keccak256, Keypair},
    data_types::{Address, Nonce, Signature},
    extra::{self, SPORT_DIGEST},
};

/// A deterministic keypair derived from `name`, so that tests can refer to accounts by name.
pub(crate) fn named_keypair(name: &str) -> Keypair {
    let secret = keccak256(name.as_bytes());
    Keypair::new(SigningKey::from_slice(secret.as_slice()).unwrap())
}

/// `n` fresh keypairs, ordered by address.
pub(crate) fn sorted_keypairs(n: usize) -> Vec<Keypair> {
    let mut keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();
    keypairs.sort_by_key(|keypair| keypair.address());
    keypairs
}

pub(crate) fn addresses(keypairs: &[Keypair]) -> Vec<Address> {
    keypairs.iter().map(|keypair| keypair.address()).collect()
}

/// A genesis header listing `validators` in its extra-data.
pub(crate) fn genesis_header(validators: &[Address], time: u64) -> Header {
    Header {
        uncle_hash: empty_uncle_hash(),
        tx_hash: transactions_hash(&[]),
        difficulty: 1,
        gas_limit: 4_700_000,
        time,
        extra: extra::prepare_extra(b"sport genesis", validators),
        mix_digest: SPORT_DIGEST,
        ..Header::default()
    }
}

/// The child of `parent`, sealed by `signer`, listing `validators`, and carrying `vote` if any.
pub(crate) fn sealed_child(
    parent: &Header,
    signer: &Keypair,
    validators: &[Address],
    vote: Option<(Address, bool)>,
) -> Header {
    let (coinbase, nonce) = match vote {
        Some((address, true)) => (address, Nonce::AUTH_VOTE),
        Some((address, false)) => (address, Nonce::DROP_VOTE),
        None => (Address::zero(), Nonce::EMPTY),
    };
    let mut header = Header {
        parent_hash: parent.hash(),
        uncle_hash: empty_uncle_hash(),
        coinbase,
        tx_hash: transactions_hash(&[]),
        difficulty: 1,
        number: parent.number + 1,
        gas_limit: parent.gas_limit,
        time: parent.time + 1,
        extra: extra::prepare_extra(&[], validators),
        mix_digest: SPORT_DIGEST,
        nonce,
        ..Header::default()
    };
    seal(&mut header, signer);
    header
}

/// Write `signer`'s seal into `header`.
pub(crate) fn seal(header: &mut Header, signer: &Keypair) {
    let seal_hash = extra::seal_hash(header).unwrap();
    let seal = signer.sign(seal_hash.as_slice()).unwrap();
    extra::write_seal(header, &seal).unwrap();
}

/// Committed seals over `header` by each of `signers`.
pub(crate) fn committed_seals(header: &Header, signers: &[&Keypair]) -> Vec<Signature> {
    let proposal_seal = extra::prepare_committed_seal(&header.hash());
    signers
        .iter()
        .map(|signer| signer.sign(&proposal_seal).unwrap())
        .collect()
}

/// `header` with committed seals from `signers` written into it.
pub(crate) fn committed(mut header: Header, signers: &[&Keypair]) -> Header {
    let seals = committed_seals(&header, signers);
    extra::write_committed_seals(&mut header, &seals).unwrap();
    header
}

pub(crate) fn empty_block(header: Header) -> Block {
    Block::new(header, Vec::new())
}
