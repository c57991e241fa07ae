use dg_chain::{parse_genesis_config, Chain};
use dg_core::DgError;

use crate::witnessset::WitnessSet;

/// Stateless namespace → WitnessSet lookup.
///
/// Nothing is cached: every query rebuilds from chain state, so the registry
/// can never diverge from the ledger. The active configuration is currently
/// the one embedded in Genesis; when PolicyHead-carried witness changes land
/// they follow the same latest-wins rule through this lookup.
pub struct WitnessRegistry<'a> {
    chain: &'a Chain,
}

impl<'a> WitnessRegistry<'a> {
    pub fn new(chain: &'a Chain) -> Self {
        Self { chain }
    }

    /// The WitnessSet governing `namespace`, or `None` if unconfigured.
    pub fn get_witness_set(&self, namespace: &str) -> Result<Option<WitnessSet>, DgError> {
        let Some(genesis) = self.chain.genesis() else {
            return Ok(None);
        };
        if genesis.fact().namespace != namespace {
            return Ok(None);
        }
        let config = parse_genesis_config(genesis)?;
        match config.witness_set {
            Some(ws) => Ok(Some(WitnessSet::new(namespace, ws.witnesses, ws.threshold)?)),
            None => Ok(None),
        }
    }

    pub fn has_witness_set(&self, namespace: &str) -> Result<bool, DgError> {
        Ok(self.get_witness_set(namespace)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_chain::GenesisSpec;

    #[test]
    fn genesis_witness_set_is_found_for_root() {
        let mut chain = Chain::new();
        chain
            .initialize(
                &GenesisSpec::new("G", "corp")
                    .with_witness_set(vec!["alice".into(), "bob".into(), "charlie".into()], 2),
            )
            .unwrap();
        let registry = WitnessRegistry::new(&chain);
        let ws = registry.get_witness_set("corp").unwrap().unwrap();
        assert_eq!(ws.threshold(), 2);
        assert_eq!(ws.witnesses().len(), 3);
        assert!(!registry.has_witness_set("corp.hr").unwrap());
    }

    #[test]
    fn graph_without_witness_set_returns_none() {
        let mut chain = Chain::new();
        chain.initialize(&GenesisSpec::new("G", "corp")).unwrap();
        let registry = WitnessRegistry::new(&chain);
        assert!(registry.get_witness_set("corp").unwrap().is_none());
    }
}
