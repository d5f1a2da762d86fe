//! The table of lowering rules, keyed by primitive.
//!
//! Built once on first use and immutable afterwards.

use lazy_static::lazy_static;
use mosaic_jaxpr::{Params, Primitive};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::rules;
use crate::value::{Lowered, RuleOutput};

/// A lowering rule: emits IR for one equation and returns its results.
pub type LoweringRule =
    fn(&mut RuleContext<'_>, Vec<Lowered>, &Params) -> Result<RuleOutput, LoweringError>;

#[derive(Default)]
pub struct RuleTable {
    rules: FxHashMap<Primitive, LoweringRule>,
    /// Primitives whose rules receive literal operands unmaterialized.
    skip_materialization: FxHashSet<Primitive>,
}

impl RuleTable {
    pub fn register(&mut self, primitive: Primitive, rule: LoweringRule) {
        if self.rules.insert(primitive, rule).is_some() {
            log::warn!("lowering rule for `{}` registered twice", primitive);
        }
    }

    /// Registers a rule that handles host literals itself.
    pub fn register_raw(&mut self, primitive: Primitive, rule: LoweringRule) {
        self.register(primitive, rule);
        self.skip_materialization.insert(primitive);
    }
}

lazy_static! {
    static ref RULES: RuleTable = {
        let mut table = RuleTable::default();
        rules::register_all(&mut table);
        log::debug!("registered {} lowering rules", table.rules.len());
        table
    };
}

pub fn rule_for(primitive: Primitive) -> Option<LoweringRule> {
    RULES.rules.get(&primitive).copied()
}

pub fn skips_materialization(primitive: Primitive) -> bool {
    RULES.skip_materialization.contains(&primitive)
}

/// Every primitive that has a rule, in declaration order.
pub fn registered_primitives() -> Vec<Primitive> {
    Primitive::ALL
        .iter()
        .copied()
        .filter(|p| RULES.rules.contains_key(p))
        .collect()
}
