//! Bill-of-materials expansion.
//!
//! Expansion walks the recipe graph with an explicit frame stack and a
//! path set of the items currently being expanded, so cycles in the
//! reference data surface as [`ExpansionError::CyclicRecipe`] and the
//! depth limit bounds the work regardless of how deep the data goes.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{
    entities::{Efficiency, EfficiencyPlan, ItemId, MaterialKind, MaterialRequirement, Recipe},
    error::ExpansionError,
    providers::RecipeProvider,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionNode {
    pub item_id: ItemId,
    /// Units required by the parent job (for the root: units produced).
    pub quantity: u64,
    /// Job runs scheduled to cover `quantity`. Zero for leaves.
    pub runs: u64,
    /// Production time of those runs, in seconds. Zero for leaves.
    pub job_secs: u64,
    pub depth: u32,
    pub kind: MaterialKind,
    pub children: Vec<ExpansionNode>,
}

impl ExpansionNode {
    fn leaf(material: MaterialRequirement, kind: MaterialKind) -> Self {
        Self {
            item_id: material.item_id,
            quantity: material.quantity,
            runs: 0,
            job_secs: 0,
            depth: material.tier,
            kind,
            children: Vec::new(),
        }
    }

    fn job(item_id: ItemId, quantity: u64, runs: u64, recipe: &Recipe, depth: u32) -> Self {
        Self {
            item_id,
            quantity,
            runs,
            job_secs: runs.saturating_mul(recipe.base_time_secs),
            depth,
            kind: MaterialKind::Manufactured,
            children: Vec::with_capacity(recipe.inputs.len()),
        }
    }

    /// Depth-first, pre-order walk starting at this node.
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { stack: vec![self] }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionTree {
    pub root: ExpansionNode,
    pub max_depth: u32,
    /// At least one branch stopped at the depth limit.
    pub truncated: bool,
}

impl ExpansionTree {
    pub fn nodes(&self) -> NodeIter<'_> {
        self.root.iter()
    }

    pub fn total_job_secs(&self) -> u64 {
        self.nodes().map(|node| node.job_secs).fold(0, u64::saturating_add)
    }

    pub fn deepest(&self) -> u32 {
        self.nodes().map(|node| node.depth).max().unwrap_or(0)
    }
}

pub struct NodeIter<'a> {
    stack: Vec<&'a ExpansionNode>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a ExpansionNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Tier-1 materials of `runs` jobs of `item_id`. Does not recurse.
pub fn expand_direct<R>(
    recipes: &R,
    item_id: &str,
    runs: u64,
    efficiency: Efficiency,
) -> Result<Vec<MaterialRequirement>, ExpansionError>
where
    R: RecipeProvider + ?Sized,
{
    if runs == 0 {
        return Err(ExpansionError::InvalidRuns(runs));
    }
    let recipe = recipes
        .recipe(item_id)
        .ok_or_else(|| ExpansionError::UnknownItem(item_id.to_string()))?;
    job_materials(recipes, recipe, runs, efficiency, 1)
}

/// Full manufacturing tree of `runs` jobs of `item_id`.
pub fn expand_full<R>(
    recipes: &R,
    item_id: &str,
    runs: u64,
    plan: &EfficiencyPlan,
    max_depth: u32,
) -> Result<ExpansionTree, ExpansionError>
where
    R: RecipeProvider + ?Sized,
{
    struct Frame {
        node: ExpansionNode,
        pending: std::vec::IntoIter<MaterialRequirement>,
    }

    if runs == 0 {
        return Err(ExpansionError::InvalidRuns(runs));
    }
    if max_depth == 0 {
        return Err(ExpansionError::InvalidDepthLimit);
    }
    let recipe = recipes
        .recipe(item_id)
        .ok_or_else(|| ExpansionError::UnknownItem(item_id.to_string()))?;

    let mut path: Vec<ItemId> = vec![item_id.to_string()];
    let mut on_path: HashSet<ItemId> = HashSet::from([item_id.to_string()]);
    let mut truncated = false;

    let root = ExpansionNode::job(
        item_id.to_string(),
        runs.saturating_mul(recipe.output_per_run),
        runs,
        recipe,
        0,
    );
    let mut stack = vec![Frame {
        node: root,
        pending: job_materials(recipes, recipe, runs, plan.for_job(0), 1)?.into_iter(),
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(material) = frame.pending.next() else {
            let Some(finished) = stack.pop() else { break };
            path.pop();
            on_path.remove(&finished.node.item_id);
            match stack.last_mut() {
                Some(parent) => parent.node.children.push(finished.node),
                None => {
                    let tree = ExpansionTree {
                        root: finished.node,
                        max_depth,
                        truncated,
                    };
                    tracing::debug!(
                        item = item_id,
                        runs,
                        nodes = tree.nodes().count(),
                        truncated,
                        "expanded production chain"
                    );
                    return Ok(tree);
                }
            }
            continue;
        };

        if on_path.contains(&material.item_id) {
            let start = path
                .iter()
                .position(|id| *id == material.item_id)
                .unwrap_or(0);
            let mut chain = path[start..].to_vec();
            chain.push(material.item_id);
            return Err(ExpansionError::CyclicRecipe { chain });
        }

        let Some(sub_recipe) = recipes.recipe(&material.item_id) else {
            frame.node.children.push(ExpansionNode::leaf(material, MaterialKind::Raw));
            continue;
        };

        let depth = material.tier;
        if depth >= max_depth {
            truncated = true;
            frame
                .node
                .children
                .push(ExpansionNode::leaf(material, MaterialKind::DepthTruncated));
            continue;
        }

        let sub_runs = material.quantity.div_ceil(sub_recipe.output_per_run.max(1));
        let pending = job_materials(recipes, sub_recipe, sub_runs, plan.for_job(depth), depth + 1)?;
        path.push(material.item_id.clone());
        on_path.insert(material.item_id.clone());
        stack.push(Frame {
            node: ExpansionNode::job(material.item_id, material.quantity, sub_runs, sub_recipe, depth),
            pending: pending.into_iter(),
        });
    }

    // The root frame always returns from inside the loop.
    Err(ExpansionError::UnknownItem(item_id.to_string()))
}

/// Flat material list of the whole tree, excluding the root.
///
/// Quantities are summed per item and kind across every branch, so
/// intermediates show up as `Manufactured` entries and the leaves form the
/// shopping list (see [`leaves`]). Entries are ordered by tier, then id.
pub fn aggregate(tree: &ExpansionTree) -> Vec<MaterialRequirement> {
    aggregate_subtree(&tree.root)
}

/// Same as [`aggregate`], for everything below `node`.
pub fn aggregate_subtree(node: &ExpansionNode) -> Vec<MaterialRequirement> {
    let mut totals: BTreeMap<(ItemId, MaterialKind), (u64, u32)> = BTreeMap::new();
    for child in node.iter().skip(1) {
        let entry = totals
            .entry((child.item_id.clone(), child.kind))
            .or_insert((0, child.depth));
        entry.0 = entry.0.saturating_add(child.quantity);
        entry.1 = entry.1.min(child.depth);
    }

    let mut materials: Vec<MaterialRequirement> = totals
        .into_iter()
        .map(|((item_id, kind), (quantity, tier))| MaterialRequirement {
            item_id,
            quantity,
            tier,
            kind,
        })
        .collect();
    materials.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then_with(|| a.item_id.cmp(&b.item_id))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    materials
}

/// Materials that have to be bought rather than built.
pub fn leaves(materials: &[MaterialRequirement]) -> Vec<MaterialRequirement> {
    materials
        .iter()
        .filter(|material| material.kind.is_leaf())
        .cloned()
        .collect()
}

fn job_materials<R>(
    recipes: &R,
    recipe: &Recipe,
    runs: u64,
    efficiency: Efficiency,
    tier: u32,
) -> Result<Vec<MaterialRequirement>, ExpansionError>
where
    R: RecipeProvider + ?Sized,
{
    recipe
        .inputs
        .iter()
        .map(|input| {
            let kind = if recipes.recipe(&input.item_id).is_some() {
                MaterialKind::Manufactured
            } else if recipes.item(&input.item_id).is_some() {
                MaterialKind::Raw
            } else {
                return Err(ExpansionError::UnknownItem(input.item_id.clone()));
            };
            Ok(MaterialRequirement {
                item_id: input.item_id.clone(),
                quantity: efficiency.apply(input.quantity).saturating_mul(runs),
                tier,
                kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::fixtures::{chain_recipes, widget_recipes, FixtureRecipes};

    fn me(level: u8) -> EfficiencyPlan {
        EfficiencyPlan::Uniform(Efficiency::new(level).unwrap())
    }

    fn quantities(materials: &[MaterialRequirement]) -> Vec<(&str, u64)> {
        materials
            .iter()
            .map(|m| (m.item_id.as_str(), m.quantity))
            .collect()
    }

    #[test]
    fn direct_materials_follow_recipe_order() {
        let recipes = widget_recipes();
        let materials = expand_direct(&recipes, "widget", 1, Efficiency::default()).unwrap();

        assert_eq!(quantities(&materials), vec![("gear", 10), ("plate", 5)]);
        assert_eq!(materials[0].kind, MaterialKind::Raw);
        assert_eq!(materials[1].kind, MaterialKind::Manufactured);
        assert!(materials.iter().all(|m| m.tier == 1));
    }

    #[test]
    fn direct_discount_is_applied_before_runs() {
        let recipes = widget_recipes();
        let materials = expand_direct(&recipes, "plate", 3, Efficiency::new(10).unwrap()).unwrap();

        // floor(2 * 0.9) = 1 per run, then times 3 runs (not floor(6 * 0.9) = 5).
        assert_eq!(quantities(&materials), vec![("gear", 3)]);
    }

    #[test]
    fn direct_rejects_items_without_recipe() {
        let recipes = widget_recipes();
        assert_eq!(
            expand_direct(&recipes, "gear", 1, Efficiency::default()),
            Err(ExpansionError::UnknownItem("gear".into()))
        );
        assert_eq!(
            expand_direct(&recipes, "widget", 0, Efficiency::default()),
            Err(ExpansionError::InvalidRuns(0))
        );
    }

    #[test]
    fn widget_tree_matches_hand_expansion() {
        let recipes = widget_recipes();
        let tree = expand_full(&recipes, "widget", 1, &me(0), 10).unwrap();

        assert_eq!(tree.root.item_id, "widget");
        assert_eq!(quantities_of(&tree.root), vec![("gear", 10), ("plate", 5)]);
        // Plate jobs yield 5 units, so one run covers the widget.
        let plate = &tree.root.children[1];
        assert_eq!(plate.runs, 1);
        assert_eq!(quantities_of(plate), vec![("gear", 2)]);
        assert!(!tree.truncated);
    }

    fn quantities_of(node: &ExpansionNode) -> Vec<(&str, u64)> {
        node.children
            .iter()
            .map(|c| (c.item_id.as_str(), c.quantity))
            .collect()
    }

    fn total(materials: &[MaterialRequirement], item: &str) -> u64 {
        materials
            .iter()
            .filter(|m| m.item_id == item && m.kind.is_leaf())
            .map(|m| m.quantity)
            .sum()
    }

    #[test]
    fn widget_aggregate_sums_shared_gears() {
        let recipes = widget_recipes();
        let tree = expand_full(&recipes, "widget", 1, &me(0), 10).unwrap();
        let materials = aggregate(&tree);

        let gear = materials.iter().find(|m| m.item_id == "gear").unwrap();
        let plate = materials.iter().find(|m| m.item_id == "plate").unwrap();
        assert_eq!(gear.quantity, 12);
        assert_eq!(gear.kind, MaterialKind::Raw);
        assert_eq!(gear.tier, 1);
        assert_eq!(plate.quantity, 5);
        assert_eq!(plate.kind, MaterialKind::Manufactured);
        assert_eq!(leaves(&materials).len(), 1);
    }

    #[test]
    fn discounted_plate_jobs_need_one_gear() {
        let recipes = widget_recipes();
        let plan = EfficiencyPlan::PerTier {
            default: Efficiency::default(),
            tiers: BTreeMap::from([(1, Efficiency::new(10).unwrap())]),
        };
        let tree = expand_full(&recipes, "widget", 1, &plan, 10).unwrap();

        // Root job undiscounted; plate job: max(1, floor(2 * 0.9)) = 1.
        assert_eq!(quantities_of(&tree.root), vec![("gear", 10), ("plate", 5)]);
        assert_eq!(quantities_of(&tree.root.children[1]), vec![("gear", 1)]);
        assert_eq!(total(&aggregate(&tree), "gear"), 11);
    }

    #[test]
    fn uniform_discount_applies_to_every_job() {
        let recipes = widget_recipes();
        let tree = expand_full(&recipes, "widget", 1, &me(10), 10).unwrap();

        // floor(10 * 0.9) = 9 direct, 1 via plate; plates: floor(5 * 0.9) = 4.
        assert_eq!(quantities_of(&tree.root), vec![("gear", 9), ("plate", 4)]);
        assert_eq!(total(&aggregate(&tree), "gear"), 10);
    }

    #[test]
    fn cycle_is_reported_with_its_chain() {
        let recipes = FixtureRecipes::new()
            .recipe("a", &[("b", 1)])
            .recipe("b", &[("a", 1)]);

        let err = expand_full(&recipes, "a", 1, &me(0), 50).unwrap_err();
        assert_eq!(
            err,
            ExpansionError::CyclicRecipe {
                chain: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn self_referencing_recipe_is_a_cycle() {
        let recipes = FixtureRecipes::new().raw("ore").recipe("loop", &[("ore", 1), ("loop", 1)]);
        assert!(matches!(
            expand_full(&recipes, "loop", 1, &me(0), 5),
            Err(ExpansionError::CyclicRecipe { .. })
        ));
    }

    #[test]
    fn shared_item_on_sibling_branches_is_not_a_cycle() {
        let recipes = FixtureRecipes::new()
            .raw("ore")
            .recipe("bolt", &[("ore", 1)])
            .recipe("frame", &[("bolt", 2)])
            .recipe("hull", &[("bolt", 4), ("frame", 1)]);

        let tree = expand_full(&recipes, "hull", 1, &me(0), 10).unwrap();
        let materials = aggregate(&tree);
        assert_eq!(total(&materials, "ore"), 6);
    }

    #[test]
    fn depth_limit_truncates_deep_chains() {
        let recipes = chain_recipes(10);
        let tree = expand_full(&recipes, "tier0", 1, &me(0), 3).unwrap();

        assert!(tree.truncated);
        assert!(tree.nodes().all(|node| node.depth <= 3));
        let at_limit: Vec<_> = tree.nodes().filter(|node| node.depth == 3).collect();
        assert!(!at_limit.is_empty());
        assert!(at_limit
            .iter()
            .all(|node| node.kind == MaterialKind::DepthTruncated && node.children.is_empty()));
    }

    #[test]
    fn raw_leaf_at_the_limit_stays_raw() {
        let recipes = chain_recipes(3);
        let tree = expand_full(&recipes, "tier0", 1, &me(0), 3).unwrap();

        assert!(!tree.truncated);
        let deepest: Vec<_> = tree.nodes().filter(|node| node.depth == 3).collect();
        assert!(deepest.iter().all(|node| node.kind == MaterialKind::Raw));
    }

    #[test]
    fn zero_depth_limit_is_rejected() {
        let recipes = widget_recipes();
        assert_eq!(
            expand_full(&recipes, "widget", 1, &me(0), 0),
            Err(ExpansionError::InvalidDepthLimit)
        );
    }

    #[test]
    fn unknown_material_reference_fails_expansion() {
        let recipes = FixtureRecipes::new().recipe("widget", &[("ghost", 1)]);
        assert_eq!(
            expand_full(&recipes, "widget", 1, &me(0), 5),
            Err(ExpansionError::UnknownItem("ghost".into()))
        );
    }

    #[test]
    fn batch_output_rounds_sub_runs_up() {
        let recipes = FixtureRecipes::new()
            .raw("ore")
            .batch_recipe("ammo", &[("ore", 3)], 100)
            .recipe("turret", &[("ammo", 250)]);

        let tree = expand_full(&recipes, "turret", 1, &me(0), 5).unwrap();
        let ammo = &tree.root.children[0];
        assert_eq!(ammo.quantity, 250);
        assert_eq!(ammo.runs, 3);
        assert_eq!(ammo.children[0].quantity, 9);
    }

    #[test]
    fn expansion_is_idempotent() {
        let recipes = chain_recipes(6);
        let first = expand_full(&recipes, "tier0", 4, &me(7), 5).unwrap();
        let second = expand_full(&recipes, "tier0", 4, &me(7), 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn aggregate_conserves_leaf_quantities() {
        let recipes = FixtureRecipes::new()
            .raw("ore")
            .raw("gas")
            .recipe("bolt", &[("ore", 3)])
            .recipe("panel", &[("ore", 5), ("gas", 2), ("bolt", 4)])
            .recipe("ship", &[("panel", 7), ("bolt", 11), ("gas", 9)]);
        let tree = expand_full(&recipes, "ship", 2, &me(4), 10).unwrap();

        let mut per_branch: HashMap<&str, u64> = HashMap::new();
        for node in tree.nodes().filter(|n| n.kind.is_leaf()) {
            *per_branch.entry(node.item_id.as_str()).or_default() += node.quantity;
        }
        let materials = aggregate(&tree);
        for (item, quantity) in per_branch {
            assert_eq!(total(&materials, item), quantity, "{item}");
        }
    }

    #[test]
    fn job_time_accumulates_over_manufactured_nodes() {
        let recipes = widget_recipes();
        let tree = expand_full(&recipes, "widget", 2, &me(0), 10).unwrap();
        // widget: 2 runs * 600s, plate: 10 units in batches of 5.
        assert_eq!(tree.total_job_secs(), 2 * 600 + 2 * 60);
    }
}
