//! Commodity registry.
//!
//! The pool interns one [`Commodity`] per symbol and records which
//! symbols the journal has been told about, which is what the checking
//! policy consults when an unfamiliar symbol shows up.

use bitflags::bitflags;
use compact_str::CompactString;
use std::collections::HashMap;

bitflags! {
    /// Per-commodity state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommodityFlags: u32 {
        /// Created by the pool itself rather than by journal input.
        const BUILTIN = 0x020;
        /// The symbol has been declared, or seen under a permissive policy.
        const KNOWN = 0x080;
    }
}

/// A single commodity symbol and its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commodity {
    symbol: CompactString,
    flags: CommodityFlags,
}

impl Commodity {
    fn new(symbol: &str) -> Self {
        Commodity {
            symbol: CompactString::from(symbol),
            flags: CommodityFlags::empty(),
        }
    }

    /// The symbol this commodity was interned under.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current state bits.
    pub fn flags(&self) -> CommodityFlags {
        self.flags
    }

    /// Sets the given state bits.
    pub fn add_flags(&mut self, flags: CommodityFlags) {
        self.flags |= flags;
    }

    /// True once the symbol has been declared known.
    pub fn is_known(&self) -> bool {
        self.flags.contains(CommodityFlags::KNOWN)
    }

    /// Marks the symbol as known.
    pub fn mark_known(&mut self) {
        self.flags |= CommodityFlags::KNOWN;
    }
}

/// Owns every commodity the journal has seen, keyed by symbol.
#[derive(Debug, Clone)]
pub struct CommodityPool {
    commodities: HashMap<CompactString, Commodity>,
}

impl CommodityPool {
    /// Creates a pool holding only the built-in empty commodity, which
    /// stands for amounts with no symbol and never triggers checking.
    pub fn new() -> Self {
        let mut null_commodity = Commodity::new("");
        null_commodity.add_flags(CommodityFlags::BUILTIN | CommodityFlags::KNOWN);

        let mut commodities = HashMap::new();
        commodities.insert(CompactString::from(""), null_commodity);
        CommodityPool { commodities }
    }

    /// Looks up a commodity, interning it on first sight.
    pub fn find_or_create(&mut self, symbol: &str) -> &mut Commodity {
        self.commodities
            .entry(CompactString::from(symbol))
            .or_insert_with(|| Commodity::new(symbol))
    }

    /// Looks up a commodity without creating it.
    pub fn find(&self, symbol: &str) -> Option<&Commodity> {
        self.commodities.get(symbol)
    }

    /// Mutable lookup without creating.
    pub fn find_mut(&mut self, symbol: &str) -> Option<&mut Commodity> {
        self.commodities.get_mut(symbol)
    }

    /// Number of interned commodities, the built-in one included.
    pub fn len(&self) -> usize {
        self.commodities.len()
    }

    /// True when only the built-in commodity exists.
    pub fn is_empty(&self) -> bool {
        self.commodities.len() <= 1
    }

    /// Iterates all interned commodities.
    pub fn commodities(&self) -> impl Iterator<Item = &Commodity> {
        self.commodities.values()
    }
}

impl Default for CommodityPool {
    fn default() -> Self {
        CommodityPool::new()
    }
}
