//! In-memory reference data shared by the unit tests.

use std::collections::HashMap;

use super::{
    entities::{Item, ItemCategory, Recipe, RecipeInput},
    providers::RecipeProvider,
};

#[derive(Default)]
pub struct FixtureRecipes {
    items: HashMap<String, Item>,
    recipes: HashMap<String, Recipe>,
}

impl FixtureRecipes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, id: &str) -> Self {
        self.items.insert(id.to_string(), item(id, ItemCategory::RawMaterial));
        self
    }

    pub fn recipe(self, id: &str, inputs: &[(&str, u64)]) -> Self {
        self.batch_recipe(id, inputs, 1)
    }

    pub fn batch_recipe(mut self, id: &str, inputs: &[(&str, u64)], output_per_run: u64) -> Self {
        self.items.insert(id.to_string(), item(id, ItemCategory::Manufactured));
        self.recipes.insert(
            id.to_string(),
            Recipe {
                output_id: id.to_string(),
                inputs: inputs
                    .iter()
                    .map(|(item_id, quantity)| RecipeInput {
                        item_id: item_id.to_string(),
                        quantity: *quantity,
                    })
                    .collect(),
                output_per_run,
                base_time_secs: 60,
            },
        );
        self
    }

    fn with_time(mut self, id: &str, secs: u64) -> Self {
        if let Some(recipe) = self.recipes.get_mut(id) {
            recipe.base_time_secs = secs;
        }
        self
    }
}

impl RecipeProvider for FixtureRecipes {
    fn recipe(&self, item_id: &str) -> Option<&Recipe> {
        self.recipes.get(item_id)
    }

    fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.get(item_id)
    }
}

fn item(id: &str, category: ItemCategory) -> Item {
    Item {
        id: id.to_string(),
        name: id.to_string(),
        volume: 1.0,
        category,
    }
}

/// Widget needs 10 gears and 5 plates; plate jobs turn 2 gears into 5 plates.
pub fn widget_recipes() -> FixtureRecipes {
    FixtureRecipes::new()
        .raw("gear")
        .batch_recipe("plate", &[("gear", 2)], 5)
        .recipe("widget", &[("gear", 10), ("plate", 5)])
        .with_time("widget", 600)
}

/// `tier0` needs `tier1`, ... down to the raw `tier{levels}`.
pub fn chain_recipes(levels: u32) -> FixtureRecipes {
    let mut recipes = FixtureRecipes::new().raw(&format!("tier{levels}"));
    for level in 0..levels {
        let input = format!("tier{}", level + 1);
        recipes = recipes.recipe(&format!("tier{level}"), &[(input.as_str(), 2)]);
    }
    recipes
}
