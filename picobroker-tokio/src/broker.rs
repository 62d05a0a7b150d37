//! Broker type used by the Tokio server

use picobroker_core::{Broker, BrokerConfig};

use crate::time::StdTimeSource;

/// Broker running on the wall clock.
pub type TokioBroker = Broker<StdTimeSource>;

/// Constructors for [`TokioBroker`].
pub trait TokioBrokerExt {
    fn new_tokio(config: BrokerConfig) -> Self;
}

impl TokioBrokerExt for TokioBroker {
    fn new_tokio(config: BrokerConfig) -> Self {
        Self::new(config, StdTimeSource)
    }
}
