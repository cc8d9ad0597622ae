//! The weight-type category tree and ticker classification.
//!
//! The tree is a fixed taxonomy rooted at *All Investments* with Stock,
//! Bond, Cash, and Real-Estate subtrees. It is built once per engine and
//! never mutated; per-account effective weights live in a separate
//! [`EffectiveWeights`](crate::weights::EffectiveWeights) table indexed by
//! [`NodeId`]. Nodes are stored in a flat arena with parent/child indices.
//!
//! Classification walks a ticker's subcode set down the tree: at each node
//! the codes vote for the child whose subtree they name, descent stops when
//! no code discriminates further, and a code that names no category on the
//! chosen path is a consistency error (e.g. `S` with `T`).

use std::fmt;

/// Index of a node in the category tree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Semantic label of a tree node. Size and style kinds repeat across the
/// stock regions; a node is identified by `NodeId`, not by kind alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum NodeKind {
    All,
    Stock,
    Bond,
    Cash,
    RealEstate,
    // Stock subtree
    Domestic,
    Foreign,
    Large,
    NotLarge,
    Medium,
    Small,
    GrowthAndValue,
    GrowthOrValue,
    Growth,
    Value,
    // Bond subtree
    BondCorporate,
    BondForeign,
    BondGovernment,
    BondHighYield,
    BondInflationProtected,
    BondMortgage,
    BondShort,
    BondUncategorized,
    // Cash subtree
    CashGovernment,
    CashUncategorized,
}

impl NodeKind {
    /// Human-readable node name for diagnostics and reports.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::All => "All Investments",
            NodeKind::Stock => "Stock",
            NodeKind::Bond => "Bond",
            NodeKind::Cash => "Cash",
            NodeKind::RealEstate => "Real Estate",
            NodeKind::Domestic => "Domestic",
            NodeKind::Foreign => "Foreign",
            NodeKind::Large => "Large",
            NodeKind::NotLarge => "Not Large",
            NodeKind::Medium => "Medium",
            NodeKind::Small => "Small",
            NodeKind::GrowthAndValue => "Growth and Value",
            NodeKind::GrowthOrValue => "Growth or Value",
            NodeKind::Growth => "Growth",
            NodeKind::Value => "Value",
            NodeKind::BondCorporate => "Corporate",
            NodeKind::BondForeign => "Foreign Bond",
            NodeKind::BondGovernment => "Government Bond",
            NodeKind::BondHighYield => "High Yield",
            NodeKind::BondInflationProtected => "Inflation Protected",
            NodeKind::BondMortgage => "Mortgage",
            NodeKind::BondShort => "Short Bond",
            NodeKind::BondUncategorized => "Uncategorized Bond",
            NodeKind::CashGovernment => "Government Cash",
            NodeKind::CashUncategorized => "Uncategorized Cash",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single-character ticker subcode. Up to four characterise a ticker's
/// asset class, region, size, and style. The placeholder `_` parses to
/// `None` and is ignored.
///
/// Meaning is context-sensitive on the accompanying type code: `M` is
/// Medium next to `S` (stock) but Mortgage next to `B` (bond); `T` and `U`
/// name the Government and Uncategorized categories under either Bond or
/// Cash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[repr(u8)]
pub enum Subcode {
    B,
    C,
    D,
    E,
    G,
    H,
    K,
    L,
    M,
    N,
    O,
    P,
    R,
    S,
    T,
    U,
    V,
    W,
    Y,
    Z,
}

impl Subcode {
    /// Parse a subcode character. Returns `None` for the placeholder `_`;
    /// any other character outside the legal set is an error.
    pub fn from_char(c: char) -> Result<Option<Subcode>, char> {
        let code = match c {
            '_' => return Ok(None),
            'B' => Subcode::B,
            'C' => Subcode::C,
            'D' => Subcode::D,
            'E' => Subcode::E,
            'G' => Subcode::G,
            'H' => Subcode::H,
            'K' => Subcode::K,
            'L' => Subcode::L,
            'M' => Subcode::M,
            'N' => Subcode::N,
            'O' => Subcode::O,
            'P' => Subcode::P,
            'R' => Subcode::R,
            'S' => Subcode::S,
            'T' => Subcode::T,
            'U' => Subcode::U,
            'V' => Subcode::V,
            'W' => Subcode::W,
            'Y' => Subcode::Y,
            'Z' => Subcode::Z,
            other => return Err(other),
        };
        Ok(Some(code))
    }

    pub fn as_char(self) -> char {
        match self {
            Subcode::B => 'B',
            Subcode::C => 'C',
            Subcode::D => 'D',
            Subcode::E => 'E',
            Subcode::G => 'G',
            Subcode::H => 'H',
            Subcode::K => 'K',
            Subcode::L => 'L',
            Subcode::M => 'M',
            Subcode::N => 'N',
            Subcode::O => 'O',
            Subcode::P => 'P',
            Subcode::R => 'R',
            Subcode::S => 'S',
            Subcode::T => 'T',
            Subcode::U => 'U',
            Subcode::V => 'V',
            Subcode::W => 'W',
            Subcode::Y => 'Y',
            Subcode::Z => 'Z',
        }
    }

    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u8)
    }

    /// True if this code names the given node kind.
    fn names(self, kind: NodeKind) -> bool {
        matches!(
            (self, kind),
            (Subcode::S, NodeKind::Stock)
                | (Subcode::B, NodeKind::Bond)
                | (Subcode::C, NodeKind::Cash)
                | (Subcode::R, NodeKind::RealEstate)
                | (Subcode::D, NodeKind::Domestic)
                | (Subcode::O, NodeKind::Foreign)
                | (Subcode::O, NodeKind::BondForeign)
                | (Subcode::L, NodeKind::Large)
                | (Subcode::N, NodeKind::NotLarge)
                | (Subcode::M, NodeKind::Medium)
                | (Subcode::M, NodeKind::BondMortgage)
                | (Subcode::Z, NodeKind::Small)
                | (Subcode::G, NodeKind::Growth)
                | (Subcode::V, NodeKind::Value)
                | (Subcode::W, NodeKind::GrowthAndValue)
                | (Subcode::Y, NodeKind::GrowthOrValue)
                | (Subcode::K, NodeKind::BondCorporate)
                | (Subcode::T, NodeKind::BondGovernment)
                | (Subcode::T, NodeKind::CashGovernment)
                | (Subcode::H, NodeKind::BondHighYield)
                | (Subcode::P, NodeKind::BondInflationProtected)
                | (Subcode::E, NodeKind::BondShort)
                | (Subcode::U, NodeKind::BondUncategorized)
                | (Subcode::U, NodeKind::CashUncategorized)
        )
    }
}

impl fmt::Display for Subcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Subcode set that implies two incompatible branches of the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubcodeConflict {
    pub first: Subcode,
    pub second: Subcode,
}

impl fmt::Display for SubcodeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subcodes {} and {} imply incompatible categories",
            self.first, self.second
        )
    }
}

struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    level: u8,
    default_weight: f64,
    /// Bitmask of subcodes naming this node or any descendant.
    subtree_codes: u32,
}

/// The static weight-type taxonomy.
pub struct CategoryTree {
    nodes: Vec<Node>,
    root: NodeId,
    stock: NodeId,
    bond: NodeId,
    cash: NodeId,
    real_estate: NodeId,
}

impl CategoryTree {
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(49);
        let root = push(&mut nodes, NodeKind::All, None, 100.0);

        // === Level 1 ===
        let stock = push(&mut nodes, NodeKind::Stock, Some(root), 50.0);
        let bond = push(&mut nodes, NodeKind::Bond, Some(root), 36.0);
        let cash = push(&mut nodes, NodeKind::Cash, Some(root), 10.0);
        let real_estate = push(&mut nodes, NodeKind::RealEstate, Some(root), 4.0);

        // === Stock subtree ===
        let domestic = push(&mut nodes, NodeKind::Domestic, Some(stock), 60.0);
        let foreign = push(&mut nodes, NodeKind::Foreign, Some(stock), 40.0);
        for region in [domestic, foreign] {
            let large = push(&mut nodes, NodeKind::Large, Some(region), 60.0);
            push_styles(&mut nodes, large);
            let not_large = push(&mut nodes, NodeKind::NotLarge, Some(region), 40.0);
            let medium = push(&mut nodes, NodeKind::Medium, Some(not_large), 50.0);
            push_styles(&mut nodes, medium);
            let small = push(&mut nodes, NodeKind::Small, Some(not_large), 50.0);
            push_styles(&mut nodes, small);
        }

        // === Bond subtree ===
        push(&mut nodes, NodeKind::BondCorporate, Some(bond), 12.5);
        push(&mut nodes, NodeKind::BondForeign, Some(bond), 7.0);
        push(&mut nodes, NodeKind::BondGovernment, Some(bond), 0.0);
        push(&mut nodes, NodeKind::BondHighYield, Some(bond), 5.0);
        push(&mut nodes, NodeKind::BondInflationProtected, Some(bond), 5.0);
        push(&mut nodes, NodeKind::BondMortgage, Some(bond), 8.0);
        push(&mut nodes, NodeKind::BondShort, Some(bond), 50.0);
        push(&mut nodes, NodeKind::BondUncategorized, Some(bond), 12.5);

        // === Cash subtree ===
        push(&mut nodes, NodeKind::CashGovernment, Some(cash), 50.0);
        push(&mut nodes, NodeKind::CashUncategorized, Some(cash), 50.0);

        let mut tree = CategoryTree {
            nodes,
            root,
            stock,
            bond,
            cash,
            real_estate,
        };
        tree.seal_subtree_codes(root);
        tree
    }

    /// Accumulate, bottom-up, the subcodes naming each node or any of its
    /// descendants.
    fn seal_subtree_codes(&mut self, id: NodeId) -> u32 {
        let mut mask = 0u32;
        for code in ALL_SUBCODES {
            if code.names(self.nodes[id.0].kind) {
                mask |= code.bit();
            }
        }
        let children = self.nodes[id.0].children.clone();
        for child in children {
            mask |= self.seal_subtree_codes(child);
        }
        self.nodes[id.0].subtree_codes = mask;
        mask
    }

    // === Queries ===

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn stock(&self) -> NodeId {
        self.stock
    }

    #[inline]
    pub fn bond(&self) -> NodeId {
        self.bond
    }

    #[inline]
    pub fn cash(&self) -> NodeId {
        self.cash
    }

    #[inline]
    pub fn real_estate(&self) -> NodeId {
        self.real_estate
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Depth from the root (root = 0).
    pub fn level(&self, id: NodeId) -> u8 {
        self.nodes[id.0].level
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id.0].children.is_empty()
    }

    /// Built-in default weight of the node.
    pub fn default_weight(&self, id: NodeId) -> f64 {
        self.nodes[id.0].default_weight
    }

    /// The level-1 ancestor (Stock/Bond/Cash/Real-Estate) of a node, or
    /// `None` for the root itself.
    pub fn level1_of(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = id;
        loop {
            match self.nodes[cur.0].level {
                0 => return None,
                1 => return Some(cur),
                _ => cur = self.nodes[cur.0].parent.expect("non-root node has a parent"),
            }
        }
    }

    /// All node ids in arena order (stable across runs).
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    // === Classification ===

    /// Bind a subcode set to the deepest consistent node.
    ///
    /// An empty set binds to the root. Codes voting for two different
    /// siblings at some node are a conflict; so is a code that names no
    /// category along the chosen path (`S` with `T`).
    pub fn classify(&self, codes: &[Subcode]) -> Result<NodeId, SubcodeConflict> {
        let mut node = self.root;
        // First code that steered descent, reported as the partner in
        // leftover conflicts.
        let mut anchor: Option<Subcode> = None;

        loop {
            let mut vote: Option<(NodeId, Subcode)> = None;
            for &code in codes {
                let mut named: Option<NodeId> = None;
                let mut ambiguous = false;
                for &child in &self.nodes[node.0].children {
                    if self.nodes[child.0].subtree_codes & code.bit() != 0 {
                        if named.is_some() {
                            ambiguous = true;
                            break;
                        }
                        named = Some(child);
                    }
                }
                // A code naming several siblings (e.g. bare M at the Stock
                // node) cannot discriminate and abstains here.
                if ambiguous {
                    continue;
                }
                if let Some(child) = named {
                    match vote {
                        None => {
                            vote = Some((child, code));
                            anchor.get_or_insert(code);
                        }
                        Some((chosen, prev)) if chosen != child => {
                            return Err(SubcodeConflict {
                                first: prev,
                                second: code,
                            });
                        }
                        Some(_) => {}
                    }
                }
            }
            match vote {
                Some((child, _)) => node = child,
                None => break,
            }
        }

        // Every code must name something at or below the binding node, or
        // on the path above it.
        for &code in codes {
            if self.nodes[node.0].subtree_codes & code.bit() != 0 {
                continue;
            }
            let mut on_path = false;
            let mut cur = Some(node);
            while let Some(id) = cur {
                if code.names(self.nodes[id.0].kind) {
                    on_path = true;
                    break;
                }
                cur = self.nodes[id.0].parent;
            }
            if !on_path {
                return Err(SubcodeConflict {
                    first: anchor.unwrap_or(code),
                    second: code,
                });
            }
        }

        Ok(node)
    }
}

impl Default for CategoryTree {
    fn default() -> Self {
        Self::new()
    }
}

const ALL_SUBCODES: [Subcode; 20] = [
    Subcode::B,
    Subcode::C,
    Subcode::D,
    Subcode::E,
    Subcode::G,
    Subcode::H,
    Subcode::K,
    Subcode::L,
    Subcode::M,
    Subcode::N,
    Subcode::O,
    Subcode::P,
    Subcode::R,
    Subcode::S,
    Subcode::T,
    Subcode::U,
    Subcode::V,
    Subcode::W,
    Subcode::Y,
    Subcode::Z,
];

fn push(nodes: &mut Vec<Node>, kind: NodeKind, parent: Option<NodeId>, weight: f64) -> NodeId {
    let id = NodeId(nodes.len());
    let level = parent.map_or(0, |p| nodes[p.0].level + 1);
    nodes.push(Node {
        kind,
        parent,
        children: Vec::new(),
        level,
        default_weight: weight,
        subtree_codes: 0,
    });
    if let Some(p) = parent {
        nodes[p.0].children.push(id);
    }
    id
}

/// Attach the style quartet under a size node: blend and growth-or-value
/// siblings, growth and value under the latter.
fn push_styles(nodes: &mut Vec<Node>, size: NodeId) {
    push(nodes, NodeKind::GrowthAndValue, Some(size), 50.0);
    let either = push(nodes, NodeKind::GrowthOrValue, Some(size), 50.0);
    push(nodes, NodeKind::Growth, Some(either), 40.0);
    push(nodes, NodeKind::Value, Some(either), 60.0);
}
