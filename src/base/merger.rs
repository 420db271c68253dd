//! Merger for two [`Base`] layers.

use super::{Base, BASE_LAYER};
use crate::error::{EmuError, Result};
use crate::layer::Layer;
use crate::merge::{downcast_layer, Merger};

/// Unions autonomous systems field by field; exchanges must come from
/// exactly one side.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseMerger;

impl BaseMerger {
    pub fn merge_bases(&self, ours: Base, theirs: Base) -> Result<Base> {
        let (mut systems, mut exchanges) = ours.into_parts();
        let (their_systems, their_exchanges) = theirs.into_parts();

        for (id, ix) in their_exchanges {
            if let Some(existing) = exchanges.get(&id) {
                return Err(EmuError::MergeCollision {
                    what: format!("internet exchange IX{}", id),
                    ours: existing.prefix.to_string(),
                    theirs: ix.prefix.to_string(),
                });
            }
            exchanges.insert(id, ix);
        }

        for (asn, asys) in their_systems {
            let merged = match systems.remove(&asn) {
                Some(existing) => {
                    log::debug!("Merging two definitions of AS{}", asn);
                    existing.merge(asys)?
                }
                None => asys,
            };
            systems.insert(asn, merged);
        }

        Ok(Base::from_parts(systems, exchanges))
    }
}

impl Merger for BaseMerger {
    fn target_type(&self) -> &str {
        BASE_LAYER
    }

    fn merge(&self, ours: Box<dyn Layer>, theirs: Box<dyn Layer>) -> Result<Box<dyn Layer>> {
        let merged = self.merge_bases(downcast_layer(ours)?, downcast_layer(theirs)?)?;
        Ok(Box::new(merged))
    }
}
