/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The operator-facing parameters of the engine.
//!
//! A [`Configuration`] can be built field by field with the builder pattern, every field falling back to
//! its default value:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .request_timeout(Duration::from_millis(3000))
//!     .block_period(5)
//!     .proposer_policy(ProposerPolicy::RoundRobin)
//!     .log_events(true)
//!     .build()
//! ```

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{consensus::implementation::CoreConfiguration, types::validator_set::ProposerPolicy};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BLOCK_PERIOD: u64 = 1;
pub const DEFAULT_EPOCH: u64 = 30_000;
pub const DEFAULT_MIN_BLOCKS_EMPTY_MINING: u64 = 20_000_000;

/// Stores the user-defined parameters of the engine, that is:
/// 1. The request timeout, the base duration of the first round of every height.
/// 2. The maximum timeout, the cap on the exponentially growing round timeout.
/// 3. The block period, the minimum number of seconds between the timestamps of consecutive blocks.
/// 4. The [proposer policy](ProposerPolicy).
/// 5. The epoch, the number of blocks after which all pending validator votes are discarded.
/// 6. The height from which blocks without transactions are no longer sealed.
/// 7. The "Log Events" flag. If set to "true", every [event](crate::events) is logged.
///
/// ## Round timeout
///
/// The round change timer of round `r` is set to `request_timeout + 2^r seconds`, clamped to
/// `max_timeout`. Keep `max_timeout` well below [u64::MAX] seconds so that deadlines computed from it
/// stay representable.
///
/// ## Log Events
///
/// The engine logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
/// onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. Every setter is optional; fields not set take the
    value they have in [`Configuration::default`].

    Optional:
    - `.request_timeout(...)`
    - `.max_timeout(...)`
    - `.block_period(...)`
    - `.proposer_policy(...)`
    - `.epoch(...)`
    - `.min_blocks_empty_mining(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(default = DEFAULT_REQUEST_TIMEOUT, setter(doc = "Set the base round timeout. Optional."))]
    pub request_timeout: Duration,
    #[builder(default = DEFAULT_MAX_TIMEOUT, setter(doc = "Set the cap on the round timeout. Optional."))]
    pub max_timeout: Duration,
    #[builder(default = DEFAULT_BLOCK_PERIOD, setter(doc = "Set the minimum number of seconds between blocks. Optional."))]
    pub block_period: u64,
    #[builder(default, setter(doc = "Set how the proposer of each round is chosen. Optional."))]
    pub proposer_policy: ProposerPolicy,
    #[builder(default = DEFAULT_EPOCH, setter(doc = "Set the number of blocks after which validator votes are reset. Optional."))]
    pub epoch: u64,
    #[builder(default = DEFAULT_MIN_BLOCKS_EMPTY_MINING, setter(doc = "Set the height from which empty blocks are not sealed. Optional."))]
    pub min_blocks_empty_mining: u64,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional."))]
    pub log_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}

impl From<&Configuration> for CoreConfiguration {
    fn from(config: &Configuration) -> Self {
        CoreConfiguration {
            request_timeout: config.request_timeout,
            max_timeout: config.max_timeout,
        }
    }
}
