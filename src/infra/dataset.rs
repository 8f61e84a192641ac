//! Static manufacturing reference data loaded from JSON.

use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Item, ItemCategory, ItemId, Recipe, RecipeProvider};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("duplicate item: {0}")]
    DuplicateItem(ItemId),
    #[error("more than one recipe produces {0}")]
    DuplicateRecipe(ItemId),
    #[error("recipe for {recipe} references unknown item {item}")]
    UnknownItemRef { recipe: ItemId, item: ItemId },
    #[error("recipe for {0} produces nothing per run")]
    ZeroOutput(ItemId),
}

/// On-disk / wire representation of the reference data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeDataset {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub recipes: Vec<Recipe>,
}

impl RecipeDataset {
    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// Validated, indexed reference data. Cycles are left for expansion to report.
#[derive(Clone, Debug, Default)]
pub struct RecipeBook {
    version: String,
    items: HashMap<ItemId, Item>,
    recipes: HashMap<ItemId, Recipe>,
}

impl RecipeBook {
    pub fn from_dataset(dataset: RecipeDataset) -> Result<Self, DatasetError> {
        let mut items = HashMap::with_capacity(dataset.items.len());
        for item in dataset.items {
            if items.contains_key(&item.id) {
                return Err(DatasetError::DuplicateItem(item.id));
            }
            items.insert(item.id.clone(), item);
        }

        let mut recipes = HashMap::with_capacity(dataset.recipes.len());
        let mut seen = HashSet::new();
        for recipe in dataset.recipes {
            if !seen.insert(recipe.output_id.clone()) {
                return Err(DatasetError::DuplicateRecipe(recipe.output_id));
            }
            if recipe.output_per_run == 0 {
                return Err(DatasetError::ZeroOutput(recipe.output_id));
            }
            let referenced = std::iter::once(&recipe.output_id)
                .chain(recipe.inputs.iter().map(|input| &input.item_id));
            for item_id in referenced {
                if !items.contains_key(item_id) {
                    return Err(DatasetError::UnknownItemRef {
                        recipe: recipe.output_id.clone(),
                        item: item_id.clone(),
                    });
                }
            }
            recipes.insert(recipe.output_id.clone(), recipe);
        }

        tracing::debug!(
            version = dataset.version.as_str(),
            items = items.len(),
            recipes = recipes.len(),
            "loaded recipe book"
        );

        Ok(Self {
            version: dataset.version,
            items,
            recipes,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        Self::from_dataset(RecipeDataset::from_json(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        Self::from_dataset(RecipeDataset::load(path)?)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }

    /// Every item with a recipe, ordered by id. Default candidates for a scan.
    pub fn manufacturable_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.recipes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Items whose metadata says raw but that still carry a recipe.
    pub fn miscategorised(&self) -> Vec<&Item> {
        self.items
            .values()
            .filter(|item| {
                item.category == ItemCategory::RawMaterial && self.recipes.contains_key(&item.id)
            })
            .collect()
    }
}

impl RecipeProvider for RecipeBook {
    fn recipe(&self, item_id: &str) -> Option<&Recipe> {
        self.recipes.get(item_id)
    }

    fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.get(item_id)
    }
}
