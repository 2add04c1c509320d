pub(crate) mod fixtures;

pub(crate) mod logging;

pub(crate) mod mem_chain;

pub(crate) mod mem_db;

pub(crate) mod mock_backend;

pub(crate) mod network;

pub(crate) mod node;
